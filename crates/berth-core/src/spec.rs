//! Declarative proxy templates.
//!
//! A `ProxySpec` is immutable once registered with a `SpecProvider`.
//! Expression-bearing fields (`display_name`, container images, env, cmd)
//! may contain `#{...}` placeholders; resolution produces a fresh spec
//! instance and never mutates the registered one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Declarative template for a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySpec {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub container_specs: Vec<ContainerSpec>,
    #[serde(default)]
    pub access_control: Option<AccessControlSpec>,
    /// Parameter schema user-supplied overrides are validated against.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Present iff this spec participates in seat pooling.
    #[serde(default)]
    pub sharing: Option<ProxySharingSpec>,
    /// Seconds of silence before the proxy counts as abandoned.
    #[serde(default)]
    pub heartbeat_timeout: Option<u64>,
}

impl ProxySpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            container_specs: Vec::new(),
            access_control: None,
            parameters: Vec::new(),
            sharing: None,
            heartbeat_timeout: None,
        }
    }

    /// Display name, falling back to the spec id.
    pub fn effective_display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn parameter(&self, id: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.id == id)
    }
}

/// Template for a single container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Stable ordinal within the spec.
    pub index: u32,
    /// Image reference; may contain expressions.
    pub image: String,
    /// Environment variables; values may contain expressions.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Command override; entries may contain expressions.
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Named ports the backend turns into route targets.
    #[serde(default)]
    pub port_targets: Vec<PortTarget>,
}

impl ContainerSpec {
    pub fn new(index: u32, image: impl Into<String>) -> Self {
        Self {
            index,
            image: image.into(),
            env: BTreeMap::new(),
            cmd: Vec::new(),
            port_targets: Vec::new(),
        }
    }
}

/// A named container port that becomes a reverse-proxy route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTarget {
    /// Route name; must be unique across all live proxies.
    pub name: String,
    pub port: u16,
}

/// Who may start proxies from a spec. An empty block means everyone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessControlSpec {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl AccessControlSpec {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.groups.is_empty()
    }
}

/// Schema entry for one user-suppliable parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub id: String,
    /// Allowed values; a supplied value outside this list is rejected.
    pub values: Vec<String>,
    #[serde(default)]
    pub default_value: Option<String>,
}

/// Pool configuration for specs that share pre-started proxies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySharingSpec {
    /// Desired steady-state number of unclaimed seats.
    pub minimum_seats_available: u32,
    /// Unclaimed seats beyond this trigger scale-down.
    pub maximum_seats_available: u32,
    /// Scale-down stays off until explicitly enabled.
    #[serde(default)]
    pub allow_scale_down: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_id() {
        let mut spec = ProxySpec::new("spec-a");
        assert_eq!(spec.effective_display_name(), "spec-a");

        spec.display_name = Some("My App".to_string());
        assert_eq!(spec.effective_display_name(), "My App");
    }

    #[test]
    fn empty_access_control_block() {
        let block = AccessControlSpec::default();
        assert!(block.is_empty());

        let block = AccessControlSpec {
            groups: vec!["g".to_string()],
            ..Default::default()
        };
        assert!(!block.is_empty());
    }

    #[test]
    fn parameter_lookup() {
        let mut spec = ProxySpec::new("spec-a");
        spec.parameters.push(ParameterSpec {
            id: "memory".to_string(),
            values: vec!["2G".to_string(), "4G".to_string()],
            default_value: Some("2G".to_string()),
        });

        assert!(spec.parameter("memory").is_some());
        assert!(spec.parameter("cpu").is_none());
    }

    #[test]
    fn spec_round_trips_through_toml() {
        let spec = ProxySpec {
            id: "spec-a".to_string(),
            display_name: Some("App".to_string()),
            container_specs: vec![ContainerSpec::new(0, "registry/app:1")],
            access_control: Some(AccessControlSpec {
                users: vec!["alice".to_string()],
                groups: vec![],
            }),
            parameters: vec![],
            sharing: Some(ProxySharingSpec {
                minimum_seats_available: 2,
                maximum_seats_available: 3,
                allow_scale_down: false,
            }),
            heartbeat_timeout: None,
        };

        let text = toml::to_string(&spec).unwrap();
        let parsed: ProxySpec = toml::from_str(&text).unwrap();
        assert_eq!(parsed, spec);
    }
}
