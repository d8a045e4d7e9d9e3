//! Performance analytics derived from the execution ledger on demand.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ExecutionRecord, ExecutionStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown analytics window '{0}' (expected 1h, 24h, 7d or 30d)")]
pub struct UnknownWindow(pub String);

/// Look-back window for [`aggregate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalyticsWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[default]
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl AnalyticsWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    pub fn duration(self) -> TimeDelta {
        self.bucket_width() * self.bucket_count() as i32
    }

    pub fn bucket_width(self) -> TimeDelta {
        match self {
            Self::OneHour => TimeDelta::minutes(5),
            Self::OneDay => TimeDelta::hours(1),
            Self::SevenDays | Self::ThirtyDays => TimeDelta::days(1),
        }
    }

    pub fn bucket_count(self) -> usize {
        match self {
            Self::OneHour => 12,
            Self::OneDay => 24,
            Self::SevenDays => 7,
            Self::ThirtyDays => 30,
        }
    }
}

impl fmt::Display for AnalyticsWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalyticsWindow {
    type Err = UnknownWindow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Self::OneHour),
            "24h" => Ok(Self::OneDay),
            "7d" => Ok(Self::SevenDays),
            "30d" => Ok(Self::ThirtyDays),
            other => Err(UnknownWindow(other.to_owned())),
        }
    }
}

/// Counts and latency figures over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub invocations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Queued or Running when the report was built.
    pub running: u64,
    /// `succeeded / (succeeded + failed + cancelled)`; `None` with no
    /// terminal runs.
    pub success_rate: Option<f64>,
    pub average_duration_ms: Option<f64>,
    pub p95_duration_ms: Option<i64>,
}

impl Summary {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a ExecutionRecord>,
    {
        let mut summary = Self::default();
        let mut durations = Vec::new();

        for record in records {
            summary.invocations += 1;
            match record.status {
                ExecutionStatus::Succeeded => summary.succeeded += 1,
                ExecutionStatus::Failed => summary.failed += 1,
                ExecutionStatus::Cancelled => summary.cancelled += 1,
                ExecutionStatus::Queued | ExecutionStatus::Running => summary.running += 1,
            }
            if record.status.is_terminal() {
                if let Some(ms) = record.duration_ms {
                    durations.push(ms);
                }
            }
        }

        let terminal = summary.succeeded + summary.failed + summary.cancelled;
        if terminal > 0 {
            summary.success_rate = Some(summary.succeeded as f64 / terminal as f64);
        }
        if !durations.is_empty() {
            let total: i64 = durations.iter().sum();
            summary.average_duration_ms = Some(total as f64 / durations.len() as f64);
            durations.sort_unstable();
            summary.p95_duration_ms = Some(nearest_rank(&durations, 95));
        }
        summary
    }
}

/// Nearest-rank percentile over sorted, non-empty input.
fn nearest_rank(sorted: &[i64], percentile: usize) -> i64 {
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowBreakdown {
    pub workflow_id: Uuid,
    #[serde(flatten)]
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub window: AnalyticsWindow,
    pub window_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: Summary,
    pub buckets: Vec<AnalyticsBucket>,
    /// Ordered by invocation count, busiest first.
    pub workflows: Vec<WorkflowBreakdown>,
}

/// Build a report over records whose `started_at` lies in
/// `[now - window, now]`. Records outside the window are ignored.
pub fn aggregate(records: &[ExecutionRecord], window: AnalyticsWindow, now: DateTime<Utc>) -> PerformanceReport {
    let window_start = now - window.duration();
    let width = window.bucket_width();
    let count = window.bucket_count();

    let in_window: Vec<&ExecutionRecord> = records
        .iter()
        .filter(|r| r.started_at.is_some_and(|at| at >= window_start && at <= now))
        .collect();

    let mut per_bucket: Vec<Vec<&ExecutionRecord>> = vec![Vec::new(); count];
    let mut per_workflow: BTreeMap<Uuid, Vec<&ExecutionRecord>> = BTreeMap::new();

    for record in in_window.iter().copied() {
        if let Some(started) = record.started_at {
            let offset = (started - window_start).num_milliseconds();
            let index = (offset / width.num_milliseconds()).clamp(0, count as i64 - 1) as usize;
            per_bucket[index].push(record);
        }
        per_workflow.entry(record.workflow_id).or_default().push(record);
    }

    let buckets = per_bucket
        .into_iter()
        .enumerate()
        .map(|(i, members)| {
            let start = window_start + width * i as i32;
            let end = if i + 1 == count { now } else { start + width };
            AnalyticsBucket {
                start,
                end,
                summary: Summary::from_records(members),
            }
        })
        .collect();

    let mut workflows: Vec<WorkflowBreakdown> = per_workflow
        .into_iter()
        .map(|(workflow_id, members)| WorkflowBreakdown {
            workflow_id,
            summary: Summary::from_records(members),
        })
        .collect();
    workflows.sort_by(|a, b| b.summary.invocations.cmp(&a.summary.invocations));

    PerformanceReport {
        window,
        window_start,
        generated_at: now,
        summary: Summary::from_records(in_window.iter().copied()),
        buckets,
        workflows,
    }
}
