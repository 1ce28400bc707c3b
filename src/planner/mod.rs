//! Planning module for reconciliation operations.
//!
//! This module handles the comparison between desired and recorded states,
//! generating dependency-ordered execution plans and applying them.

mod diff;
mod plan;
mod executor;

pub use diff::{DiffDetail, DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use plan::{ActionType, DeploymentPlan, PlanItem};
pub use executor::{ExecutionResult, ItemResult, PlanExecutor};
