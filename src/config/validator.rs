//! Configuration validation for deployment specs.
//!
//! This module provides comprehensive validation of deployment configurations,
//! ensuring all values are valid and consistent before planning. Reference
//! resolution and cycle detection happen later in the graph builder; this
//! layer catches everything that can be checked on the raw declaration.

use crate::error::{ConfigError, Result, StratoformError};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{DeployConfig, FirewallRule, ScalingGroupConfig, SecurityGroupConfig};

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_unique_names(config, &mut result);
        for group in &config.security_groups {
            Self::validate_security_group(group, &mut result);
        }
        for group in &config.scaling_groups {
            Self::validate_scaling_group(group, &mut result);
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StratoformError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project configuration.
    fn validate_project(project: &super::spec::ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates that resource names are unique across every section and
    /// follow the naming convention.
    fn validate_unique_names(config: &DeployConfig, result: &mut ValidationResult) {
        let mut seen: HashSet<String> = HashSet::new();

        for resource in config.resources() {
            if !is_valid_name(&resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{}.name", resource.kind),
                    message: format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.name
                    ),
                });
            }

            if !seen.insert(resource.name.clone()) {
                result.errors.push(ValidationError {
                    field: format!("{}.name", resource.kind),
                    message: format!("Duplicate resource name: {}", resource.name),
                });
            }
        }
    }

    /// Validates a security group's rules.
    fn validate_security_group(group: &SecurityGroupConfig, result: &mut ValidationResult) {
        for (i, rule) in group.ingress.iter().enumerate() {
            Self::validate_rule(rule, &format!("security_groups.{}.ingress.{i}", group.name), result);
        }
        for (i, rule) in group.egress.iter().enumerate() {
            Self::validate_rule(rule, &format!("security_groups.{}.egress.{i}", group.name), result);
        }

        if group.description.is_empty() {
            result
                .warnings
                .push(format!("Security group '{}' has no description", group.name));
        }
    }

    /// Validates a single firewall rule.
    fn validate_rule(rule: &FirewallRule, field: &str, result: &mut ValidationResult) {
        if rule.from_port > rule.to_port {
            result.errors.push(ValidationError {
                field: field.to_string(),
                message: format!(
                    "Port range is inverted: {} > {}",
                    rule.from_port, rule.to_port
                ),
            });
        }

        match (&rule.cidr, &rule.source_group) {
            (None, None) => {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: String::from("Rule must specify either a cidr or a source_group"),
                });
            }
            (Some(_), Some(_)) => {
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message: String::from("Rule cannot specify both cidr and source_group"),
                });
            }
            _ => {}
        }

        if !matches!(rule.protocol.as_str(), "tcp" | "udp" | "all") {
            result.errors.push(ValidationError {
                field: field.to_string(),
                message: format!("Unknown protocol: {}", rule.protocol),
            });
        }

        if rule.cidr.as_deref() == Some("0.0.0.0/0") && rule.from_port != 443 && rule.from_port != 80
        {
            result.warnings.push(format!(
                "{field}: port {} open to the world",
                rule.from_port
            ));
        }
    }

    /// Validates a scaling group's bounds and policy.
    fn validate_scaling_group(group: &ScalingGroupConfig, result: &mut ValidationResult) {
        if group.max_size == 0 {
            result.errors.push(ValidationError {
                field: format!("scaling_groups.{}.max_size", group.name),
                message: String::from("max_size must be at least 1"),
            });
        }

        if !group.bounds_valid() {
            result.errors.push(ValidationError {
                field: format!("scaling_groups.{}.desired_capacity", group.name),
                message: format!(
                    "Capacity bounds violated: min {} <= desired {} <= max {} must hold",
                    group.min_size, group.desired_capacity, group.max_size
                ),
            });
        }

        if group.subnets.is_empty() {
            result.errors.push(ValidationError {
                field: format!("scaling_groups.{}.subnets", group.name),
                message: String::from("At least one subnet is required"),
            });
        }

        if let Some(policy) = &group.scaling {
            if policy.target_value <= 0.0 {
                result.errors.push(ValidationError {
                    field: format!("scaling_groups.{}.scaling.target_value", group.name),
                    message: String::from("target_value must be positive"),
                });
            }

            if policy.evaluation_interval_secs == 0 {
                result.errors.push(ValidationError {
                    field: format!(
                        "scaling_groups.{}.scaling.evaluation_interval_secs",
                        group.name
                    ),
                    message: String::from("evaluation interval must be at least 1 second"),
                });
            }

            if policy.scale_in_cooldown_secs < policy.scale_out_cooldown_secs {
                result.warnings.push(format!(
                    "scaling_groups.{}: scale-in cooldown shorter than scale-out cooldown invites flapping",
                    group.name
                ));
            }

            if policy.target_value < 20.0 {
                result.warnings.push(format!(
                    "scaling_groups.{}: target_value {} is unusually low and will cause near-constant scale-out",
                    group.name, policy.target_value
                ));
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    // First character must be a letter
    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase() {
            return false;
        }

    // Rest must be lowercase alphanumeric or hyphen
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    // Cannot end with hyphen
    if name.ends_with('-') {
        return false;
    }

    // Cannot have consecutive hyphens
    if name.contains("--") {
        return false;
    }

    true
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{ProjectConfig, ScalingGroupConfig, StateConfig};

    fn config_with_group(group: ScalingGroupConfig) -> DeployConfig {
        DeployConfig {
            project: ProjectConfig {
                name: String::from("web-tier"),
                environment: String::from("dev"),
                region: None,
            },
            state: StateConfig::default(),
            images: vec![],
            security_groups: vec![],
            launch_templates: vec![],
            load_balancers: vec![],
            target_groups: vec![],
            scaling_groups: vec![group],
        }
    }

    fn valid_group() -> ScalingGroupConfig {
        ScalingGroupConfig {
            name: String::from("web-asg"),
            launch_template: String::from("${resource.web-lt.id}"),
            target_group: None,
            min_size: 1,
            max_size: 4,
            desired_capacity: 2,
            health_check_grace_secs: 60,
            subnets: vec![String::from("subnet-a")],
            scaling: None,
        }
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web-asg"));
        assert!(is_valid_name("my-tier-123"));
        assert!(is_valid_name("a"));
        assert!(is_valid_name("test"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web-Asg")); // uppercase
        assert!(!is_valid_name("123-web")); // starts with number
        assert!(!is_valid_name("web_asg")); // underscore
        assert!(!is_valid_name("web-")); // ends with hyphen
        assert!(!is_valid_name("web--asg")); // consecutive hyphens
    }

    #[test]
    fn valid_config_passes() {
        let validator = ConfigValidator::new();
        let result = validator.validate(&config_with_group(valid_group())).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn capacity_bounds_violation_fails() {
        let mut group = valid_group();
        group.desired_capacity = 9;
        let validator = ConfigValidator::new();
        assert!(validator.validate(&config_with_group(group)).is_err());
    }

    #[test]
    fn duplicate_names_fail() {
        let mut config = config_with_group(valid_group());
        config.scaling_groups.push(valid_group());
        let validator = ConfigValidator::new();
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn low_target_value_warns() {
        let mut group = valid_group();
        group.scaling = Some(crate::config::spec::ScalingPolicyConfig {
            metric: crate::config::spec::MetricKind::CpuUtilization,
            target_value: 10.0,
            evaluation_interval_secs: 60,
            scale_out_cooldown_secs: 60,
            scale_in_cooldown_secs: 300,
        });
        let validator = ConfigValidator::new();
        let result = validator.validate(&config_with_group(group)).unwrap();
        assert!(result.is_valid());
        assert!(result.warning_count() >= 1);
    }
}
