//! `steps` crate — the `Step` trait, the step registry, and built-in steps.
//!
//! Every step a workflow can run must implement [`Step`]. The engine crate
//! resolves a step definition's `step_type` through a [`StepRegistry`] and
//! dispatches execution through the trait object; it never looks inside.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use error::StepError;
pub use registry::StepRegistry;
pub use traits::{Step, StepContext};
