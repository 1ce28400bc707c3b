//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of configuration structures
//! to detect changes between applies and enable idempotent operations.

use sha2::{Digest, Sha256};

use super::spec::{DeployConfig, Resource};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire deployment configuration.
    ///
    /// This hash changes when any resource attribute changes.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());
        if let Some(region) = &config.project.region {
            hasher.update(region.as_bytes());
        }

        for resource in config.resources() {
            hasher.update(self.hash_resource(&resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource.
    ///
    /// Attributes are iterated in `BTreeMap` key order, so the hash is
    /// independent of declaration order within the resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &Resource) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.name.as_bytes());
        hasher.update(resource.kind.to_string().as_bytes());

        for (key, value) in &resource.attributes {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::ResourceKind;
    use std::collections::BTreeMap;

    fn resource(name: &str, attrs: &[(&str, &str)]) -> Resource {
        let attributes: BTreeMap<String, String> = attrs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Resource {
            name: name.to_string(),
            kind: ResourceKind::SecurityGroup,
            attributes,
        }
    }

    #[test]
    fn identical_resources_hash_equal() {
        let hasher = ConfigHasher::new();
        let a = resource("web-sg", &[("network", "vpc-1"), ("ingress.0.cidr", "0.0.0.0/0")]);
        let b = resource("web-sg", &[("ingress.0.cidr", "0.0.0.0/0"), ("network", "vpc-1")]);
        assert_eq!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn attribute_change_changes_hash() {
        let hasher = ConfigHasher::new();
        let a = resource("web-sg", &[("ingress.0.cidr", "0.0.0.0/0")]);
        let b = resource("web-sg", &[("ingress.0.cidr", "10.0.0.0/8")]);
        assert_ne!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }

    #[test]
    fn key_and_value_are_delimited() {
        let hasher = ConfigHasher::new();
        // "ab"+"c" must not collide with "a"+"bc".
        let a = resource("r", &[("ab", "c")]);
        let b = resource("r", &[("a", "bc")]);
        assert_ne!(hasher.hash_resource(&a), hasher.hash_resource(&b));
    }
}
