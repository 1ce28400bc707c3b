// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratoform
//!
//! A declarative, idempotent reconciliation engine for load-balanced,
//! auto-scaling web tiers.
//!
//! ## Overview
//!
//! Stratoform converges real infrastructure toward a declaration:
//!
//! - Define the web tier as code in a YAML configuration file
//! - Diff the declaration against durable recorded state
//! - Apply the resulting plan in dependency order, replacements
//!   create-before-destroy
//! - Keep scaling groups sized to a target metric with per-group
//!   target-tracking controllers
//!
//! ## Architecture
//!
//! The system is built around **desired state reconciliation**:
//!
//! 1. **Desired State**: Defined in `stratoform.deploy.yaml`
//! 2. **Recorded State**: The state store's record of the last apply
//! 3. **Reconciler**: Diffs the two and executes a dependency-ordered plan
//! 4. **Autoscaling Controller**: Steers each group's capacity toward its
//!    metric target between applies
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation, and hashing
//! - [`graph`]: Reference scanning and dependency ordering
//! - [`state`]: State storage and locking
//! - [`provider`]: Cloud provider trait and in-memory implementation
//! - [`planner`]: Diff computation, plan construction, and execution
//! - [`reconciler`]: Orchestration and the capacity actuator
//! - [`autoscale`]: Target-tracking policy and control loop
//! - [`lb`]: Load-balancer health signals and instance probing
//! - [`metrics`]: Metric source integration
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: web-tier
//!   environment: prod
//!
//! scaling_groups:
//!   - name: web-asg
//!     launch_template: "${resource.web-lt.id}"
//!     min_size: 2
//!     max_size: 10
//!     desired_capacity: 2
//!     subnets: [subnet-a, subnet-b]
//!     scaling:
//!       metric: cpu_utilization
//!       target_value: 60.0
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod autoscale;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod lb;
pub mod metrics;
pub mod planner;
pub mod provider;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use autoscale::{
    AutoscaleController, CapacityActuator, CapacityChange, CapacityRequest, ControllerConfig,
    GroupCapacity, ScaleDecision,
};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{Result, StratoformError};
pub use graph::DependencyGraph;
pub use lb::{HealthSignal, HealthSource, HttpHealthSource, HttpProber};
pub use metrics::{MetricSample, MetricSource};
pub use planner::{DeploymentPlan, DiffEngine, PlanExecutor};
pub use provider::{CloudProvider, MemoryProvider};
pub use reconciler::{DriftReport, ReconciliationResult, Reconciler};
pub use state::{LocalStateStore, StateStore, TierState};
