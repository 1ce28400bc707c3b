//! Configuration specification types for the reconciliation engine.
//!
//! This module defines all the structs that map to the `stratoform.deploy.yaml`
//! file. These types are declarative and fully describe the desired state of
//! a load-balanced, auto-scaling web tier. Each typed section flattens into
//! the generic [`Resource`] model consumed by the graph builder and planner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The root configuration structure for a Stratoform deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeployConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Machine image lookups.
    #[serde(default)]
    pub images: Vec<ImageLookupConfig>,
    /// Security groups.
    #[serde(default)]
    pub security_groups: Vec<SecurityGroupConfig>,
    /// Launch templates.
    #[serde(default)]
    pub launch_templates: Vec<LaunchTemplateConfig>,
    /// Load balancers.
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerConfig>,
    /// Target groups.
    #[serde(default)]
    pub target_groups: Vec<TargetGroupConfig>,
    /// Scaling groups.
    #[serde(default)]
    pub scaling_groups: Vec<ScalingGroupConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Provider region preference.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Local state file path (defaults to `.stratoform/state.json`).
    #[serde(default)]
    pub path: Option<String>,
}

/// A machine image lookup.
///
/// Resolved by the provider to a concrete image ID; any change to the lookup
/// criteria yields a different image and forces replacement of consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageLookupConfig {
    /// Unique name for this lookup.
    pub name: String,
    /// Image family or name pattern (e.g., "al2023-ami-*").
    pub family: String,
    /// CPU architecture.
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Whether to pick the most recently published match.
    #[serde(default = "default_true")]
    pub most_recent: bool,
}

/// A security group with layered ingress and egress rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroupConfig {
    /// Unique name for the security group.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Network identifier the group belongs to.
    pub network: String,
    /// Ingress rules.
    #[serde(default)]
    pub ingress: Vec<FirewallRule>,
    /// Egress rules.
    #[serde(default)]
    pub egress: Vec<FirewallRule>,
}

/// A single firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallRule {
    /// Protocol ("tcp", "udp", or "all").
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// First port in the range.
    pub from_port: u16,
    /// Last port in the range.
    pub to_port: u16,
    /// CIDR block the rule applies to. Mutually exclusive with
    /// `source_group`; may contain a `${resource...}` reference.
    #[serde(default)]
    pub cidr: Option<String>,
    /// Source security group reference (layering).
    #[serde(default)]
    pub source_group: Option<String>,
}

/// A launch template describing how scaling-group members are created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchTemplateConfig {
    /// Unique name for the template.
    pub name: String,
    /// Machine image, typically a reference to an image lookup
    /// (`${resource.web-image.id}`).
    pub image: String,
    /// Instance size class.
    pub instance_type: String,
    /// Security groups attached to launched members (references).
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Startup script passed to new members.
    #[serde(default)]
    pub user_data: Option<String>,
}

/// A load balancer fronting the web tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerConfig {
    /// Unique name for the load balancer.
    pub name: String,
    /// Subnets the balancer spans.
    pub subnets: Vec<String>,
    /// Security groups attached to the balancer (references).
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Whether the balancer is internal-only.
    #[serde(default)]
    pub internal: bool,
}

/// A target group receiving traffic from a load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetGroupConfig {
    /// Unique name for the target group.
    pub name: String,
    /// Port targets listen on.
    pub port: u16,
    /// Protocol ("http" or "https").
    #[serde(default = "default_http")]
    pub protocol: String,
    /// Network identifier the group belongs to.
    pub network: String,
    /// Load balancer this group receives traffic from (reference).
    pub load_balancer: String,
    /// Health check configuration.
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

/// Health check configuration for target-group members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckConfig {
    /// HTTP path probed for health.
    #[serde(default = "default_health_path")]
    pub path: String,
    /// Probe interval in seconds.
    #[serde(default = "default_health_interval")]
    pub interval_secs: u32,
    /// Probe timeout in seconds.
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u32,
    /// Consecutive successes before a member counts as healthy.
    #[serde(default = "default_threshold")]
    pub healthy_threshold: u32,
    /// Consecutive failures before a member counts as unhealthy.
    #[serde(default = "default_threshold")]
    pub unhealthy_threshold: u32,
}

/// An auto-scaling group of launch-template-derived members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingGroupConfig {
    /// Unique name for the scaling group.
    pub name: String,
    /// Launch template members are created from (reference).
    pub launch_template: String,
    /// Target group members register with (reference).
    #[serde(default)]
    pub target_group: Option<String>,
    /// Minimum number of members.
    pub min_size: u32,
    /// Maximum number of members.
    pub max_size: u32,
    /// Initial desired capacity.
    pub desired_capacity: u32,
    /// Seconds after launch during which a member is excluded from health
    /// and metric evaluation.
    #[serde(default = "default_grace_secs")]
    pub health_check_grace_secs: u64,
    /// Subnets members are spread across.
    #[serde(default)]
    pub subnets: Vec<String>,
    /// Optional target-tracking scaling policy (at most one per group).
    #[serde(default)]
    pub scaling: Option<ScalingPolicyConfig>,
}

/// A target-tracking scaling policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicyConfig {
    /// Metric the policy tracks.
    #[serde(default)]
    pub metric: MetricKind,
    /// Target value the controller steers toward. Must be positive.
    pub target_value: f64,
    /// Evaluation interval in seconds.
    #[serde(default = "default_eval_interval")]
    pub evaluation_interval_secs: u64,
    /// Minimum seconds between consecutive scale-out actions.
    #[serde(default = "default_scale_out_cooldown")]
    pub scale_out_cooldown_secs: u64,
    /// Minimum seconds between consecutive scale-in actions.
    ///
    /// Longer than the scale-out cooldown by default: under load spikes the
    /// tier adds capacity quickly and sheds it slowly.
    #[serde(default = "default_scale_in_cooldown")]
    pub scale_in_cooldown_secs: u64,
}

/// Metrics a target-tracking policy can follow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Average CPU utilization in percent.
    #[default]
    CpuUtilization,
    /// Requests per second per member.
    RequestRate,
}

/// The kinds of provisionable resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Machine image lookup.
    Image,
    /// Security group.
    SecurityGroup,
    /// Launch template.
    LaunchTemplate,
    /// Load balancer.
    LoadBalancer,
    /// Target group.
    TargetGroup,
    /// Scaling group.
    ScalingGroup,
    /// A single scaling-group member instance.
    Instance,
}

/// A generic provisionable unit derived from the typed configuration.
///
/// Attribute values may embed `${resource.NAME.ATTR}` placeholders; the
/// dependency graph builder scans them to derive `depends_on` edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Unique name across all resources in the deployment.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Flattened attributes in deterministic key order.
    pub attributes: BTreeMap<String, String>,
}

impl DeployConfig {
    /// Flattens every typed section into the generic resource model, in
    /// declaration order (images, security groups, launch templates, load
    /// balancers, target groups, scaling groups).
    ///
    /// Declaration order is the tie-breaker for independent resources in the
    /// apply order, so this ordering must stay stable.
    #[must_use]
    pub fn resources(&self) -> Vec<Resource> {
        let mut out = Vec::new();

        for image in &self.images {
            out.push(image.to_resource());
        }
        for group in &self.security_groups {
            out.push(group.to_resource());
        }
        for template in &self.launch_templates {
            out.push(template.to_resource());
        }
        for balancer in &self.load_balancers {
            out.push(balancer.to_resource());
        }
        for target in &self.target_groups {
            out.push(target.to_resource());
        }
        for scaling in &self.scaling_groups {
            out.push(scaling.to_resource());
        }

        out
    }

    /// Returns the scaling group config with the given name.
    #[must_use]
    pub fn scaling_group(&self, name: &str) -> Option<&ScalingGroupConfig> {
        self.scaling_groups.iter().find(|g| g.name == name)
    }

    /// Returns all resource names in declaration order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<String> {
        self.resources().into_iter().map(|r| r.name).collect()
    }
}

impl ImageLookupConfig {
    /// Flattens this lookup into a generic resource.
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("family"), self.family.clone());
        attributes.insert(String::from("architecture"), self.architecture.clone());
        attributes.insert(String::from("most_recent"), self.most_recent.to_string());

        Resource {
            name: self.name.clone(),
            kind: ResourceKind::Image,
            attributes,
        }
    }
}

impl SecurityGroupConfig {
    /// Flattens this security group into a generic resource.
    ///
    /// Rules become indexed keys (`ingress.0.cidr`) so attribute-level
    /// diffing sees individual rule changes.
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("description"), self.description.clone());
        attributes.insert(String::from("network"), self.network.clone());

        for (i, rule) in self.ingress.iter().enumerate() {
            rule.flatten_into(&mut attributes, &format!("ingress.{i}"));
        }
        for (i, rule) in self.egress.iter().enumerate() {
            rule.flatten_into(&mut attributes, &format!("egress.{i}"));
        }

        Resource {
            name: self.name.clone(),
            kind: ResourceKind::SecurityGroup,
            attributes,
        }
    }
}

impl FirewallRule {
    /// Writes this rule's fields under the given key prefix.
    fn flatten_into(&self, attributes: &mut BTreeMap<String, String>, prefix: &str) {
        attributes.insert(format!("{prefix}.protocol"), self.protocol.clone());
        attributes.insert(format!("{prefix}.from_port"), self.from_port.to_string());
        attributes.insert(format!("{prefix}.to_port"), self.to_port.to_string());
        if let Some(cidr) = &self.cidr {
            attributes.insert(format!("{prefix}.cidr"), cidr.clone());
        }
        if let Some(source) = &self.source_group {
            attributes.insert(format!("{prefix}.source_group"), source.clone());
        }
    }
}

impl LaunchTemplateConfig {
    /// Flattens this launch template into a generic resource.
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("image"), self.image.clone());
        attributes.insert(String::from("instance_type"), self.instance_type.clone());
        for (i, group) in self.security_groups.iter().enumerate() {
            attributes.insert(format!("security_groups.{i}"), group.clone());
        }
        if let Some(user_data) = &self.user_data {
            attributes.insert(String::from("user_data"), user_data.clone());
        }

        Resource {
            name: self.name.clone(),
            kind: ResourceKind::LaunchTemplate,
            attributes,
        }
    }
}

impl LoadBalancerConfig {
    /// Flattens this load balancer into a generic resource.
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("internal"), self.internal.to_string());
        for (i, subnet) in self.subnets.iter().enumerate() {
            attributes.insert(format!("subnets.{i}"), subnet.clone());
        }
        for (i, group) in self.security_groups.iter().enumerate() {
            attributes.insert(format!("security_groups.{i}"), group.clone());
        }

        Resource {
            name: self.name.clone(),
            kind: ResourceKind::LoadBalancer,
            attributes,
        }
    }
}

impl TargetGroupConfig {
    /// Flattens this target group into a generic resource.
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("port"), self.port.to_string());
        attributes.insert(String::from("protocol"), self.protocol.clone());
        attributes.insert(String::from("network"), self.network.clone());
        attributes.insert(String::from("load_balancer"), self.load_balancer.clone());
        attributes.insert(
            String::from("health_check.path"),
            self.health_check.path.clone(),
        );
        attributes.insert(
            String::from("health_check.interval_secs"),
            self.health_check.interval_secs.to_string(),
        );
        attributes.insert(
            String::from("health_check.timeout_secs"),
            self.health_check.timeout_secs.to_string(),
        );

        Resource {
            name: self.name.clone(),
            kind: ResourceKind::TargetGroup,
            attributes,
        }
    }
}

impl ScalingGroupConfig {
    /// Flattens this scaling group into a generic resource.
    ///
    /// `desired_capacity` is intentionally excluded: capacity is owned by
    /// the capacity actuator after initial creation, and including it would
    /// make every autoscaler adjustment look like config drift.
    #[must_use]
    pub fn to_resource(&self) -> Resource {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            String::from("launch_template"),
            self.launch_template.clone(),
        );
        if let Some(target) = &self.target_group {
            attributes.insert(String::from("target_group"), target.clone());
        }
        attributes.insert(String::from("min_size"), self.min_size.to_string());
        attributes.insert(String::from("max_size"), self.max_size.to_string());
        attributes.insert(
            String::from("health_check_grace_secs"),
            self.health_check_grace_secs.to_string(),
        );
        for (i, subnet) in self.subnets.iter().enumerate() {
            attributes.insert(format!("subnets.{i}"), subnet.clone());
        }

        Resource {
            name: self.name.clone(),
            kind: ResourceKind::ScalingGroup,
            attributes,
        }
    }

    /// Returns true if the initial capacity satisfies the group bounds.
    #[must_use]
    pub const fn bounds_valid(&self) -> bool {
        self.min_size <= self.desired_capacity && self.desired_capacity <= self.max_size
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_health_interval(),
            timeout_secs: default_health_timeout(),
            healthy_threshold: default_threshold(),
            unhealthy_threshold: default_threshold(),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Image => "image",
            Self::SecurityGroup => "security_group",
            Self::LaunchTemplate => "launch_template",
            Self::LoadBalancer => "load_balancer",
            Self::TargetGroup => "target_group",
            Self::ScalingGroup => "scaling_group",
            Self::Instance => "instance",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CpuUtilization => "cpu_utilization",
            Self::RequestRate => "request_rate",
        };
        write!(f, "{s}")
    }
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_architecture() -> String {
    String::from("x86_64")
}

fn default_protocol() -> String {
    String::from("tcp")
}

fn default_http() -> String {
    String::from("http")
}

fn default_health_path() -> String {
    String::from("/health")
}

const fn default_true() -> bool {
    true
}

const fn default_health_interval() -> u32 {
    30
}

const fn default_health_timeout() -> u32 {
    5
}

const fn default_threshold() -> u32 {
    3
}

const fn default_grace_secs() -> u64 {
    300
}

const fn default_eval_interval() -> u64 {
    60
}

const fn default_scale_out_cooldown() -> u64 {
    60
}

const fn default_scale_in_cooldown() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_group() -> ScalingGroupConfig {
        ScalingGroupConfig {
            name: String::from("web-asg"),
            launch_template: String::from("${resource.web-lt.id}"),
            target_group: Some(String::from("${resource.web-tg.id}")),
            min_size: 2,
            max_size: 10,
            desired_capacity: 2,
            health_check_grace_secs: 300,
            subnets: vec![String::from("subnet-a"), String::from("subnet-b")],
            scaling: None,
        }
    }

    #[test]
    fn scaling_group_flattening_excludes_desired_capacity() {
        let resource = minimal_group().to_resource();
        assert_eq!(resource.kind, ResourceKind::ScalingGroup);
        assert!(!resource.attributes.contains_key("desired_capacity"));
        assert_eq!(
            resource.attributes.get("min_size").map(String::as_str),
            Some("2")
        );
        assert_eq!(
            resource.attributes.get("subnets.1").map(String::as_str),
            Some("subnet-b")
        );
    }

    #[test]
    fn bounds_check() {
        let mut group = minimal_group();
        assert!(group.bounds_valid());
        group.desired_capacity = 11;
        assert!(!group.bounds_valid());
        group.desired_capacity = 1;
        assert!(!group.bounds_valid());
    }

    #[test]
    fn firewall_rules_flatten_with_indexed_keys() {
        let group = SecurityGroupConfig {
            name: String::from("web-sg"),
            description: String::from("web tier"),
            network: String::from("vpc-1"),
            ingress: vec![FirewallRule {
                protocol: String::from("tcp"),
                from_port: 80,
                to_port: 80,
                cidr: Some(String::from("0.0.0.0/0")),
                source_group: None,
            }],
            egress: vec![],
        };

        let resource = group.to_resource();
        assert_eq!(
            resource.attributes.get("ingress.0.cidr").map(String::as_str),
            Some("0.0.0.0/0")
        );
        assert_eq!(
            resource
                .attributes
                .get("ingress.0.from_port")
                .map(String::as_str),
            Some("80")
        );
    }

    #[test]
    fn declaration_order_is_stable() {
        let config = DeployConfig {
            project: ProjectConfig {
                name: String::from("web"),
                environment: String::from("dev"),
                region: None,
            },
            state: StateConfig::default(),
            images: vec![ImageLookupConfig {
                name: String::from("web-image"),
                family: String::from("al2023-ami-*"),
                architecture: String::from("x86_64"),
                most_recent: true,
            }],
            security_groups: vec![],
            launch_templates: vec![],
            load_balancers: vec![],
            target_groups: vec![],
            scaling_groups: vec![minimal_group()],
        };

        let names = config.resource_names();
        assert_eq!(names, vec!["web-image", "web-asg"]);
    }
}
