//! Configuration module for the Stratoform engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stratoform.deploy.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    DeployConfig, FirewallRule, HealthCheckConfig, ImageLookupConfig, LaunchTemplateConfig,
    LoadBalancerConfig, MetricKind, ProjectConfig, Resource, ResourceKind, ScalingGroupConfig,
    ScalingPolicyConfig, SecurityGroupConfig, StateConfig, TargetGroupConfig,
};
pub use parser::{ConfigParser, find_config_file, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationResult};
pub use hash::ConfigHasher;
