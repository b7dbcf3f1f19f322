//! Injection of keyed runtime values around spec resolution.
//!
//! The split into a before- and an after-resolution pass is a contract, not
//! an accident: the first pass populates values spec expressions reference,
//! the second populates values computed from expression results. Collapsing
//! the two would break every spec whose expressions read runtime values.

use std::collections::HashMap;

use berth_core::auth::Authentication;
use berth_core::config::{public_path_prefix, BerthConfig};
use berth_core::error::CoreError;
use berth_core::model::{Container, Proxy};
use berth_core::runtime_values::{self, RuntimeValue};
use berth_core::spec::{ContainerSpec, ProxySpec};

use crate::error::LifecycleResult;

/// Computes and attaches runtime values to proxies and containers.
pub struct RuntimeValueService {
    heartbeat_timeout_secs: u64,
}

impl RuntimeValueService {
    pub fn new(config: &BerthConfig) -> Self {
        Self {
            heartbeat_timeout_secs: config.heartbeat_timeout_secs,
        }
    }

    /// Values available to spec expressions.
    pub fn add_runtime_values_before_resolution(
        &self,
        auth: Option<&Authentication>,
        spec: &ProxySpec,
        mut proxy: Proxy,
    ) -> Proxy {
        if let Some(auth) = auth {
            proxy.add_runtime_value(RuntimeValue::new(&runtime_values::USER_ID, &auth.name));
        }
        proxy.add_runtime_value(RuntimeValue::new(
            &runtime_values::CREATED_TIMESTAMP,
            proxy.created_timestamp.to_string(),
        ));
        let heartbeat = spec.heartbeat_timeout.unwrap_or(self.heartbeat_timeout_secs);
        proxy.add_runtime_value(RuntimeValue::new(
            &runtime_values::HEARTBEAT_TIMEOUT,
            heartbeat.to_string(),
        ));
        if proxy.runtime_value(runtime_values::PUBLIC_PATH.id).is_none() {
            proxy.add_runtime_value(RuntimeValue::new(
                &runtime_values::PUBLIC_PATH,
                format!("{}{}", public_path_prefix(), proxy.target_id),
            ));
        }
        proxy
    }

    /// Values computed from the resolved spec.
    pub fn add_runtime_values_after_resolution(
        &self,
        resolved_spec: &ProxySpec,
        mut proxy: Proxy,
    ) -> Proxy {
        proxy.add_runtime_value(RuntimeValue::new(
            &runtime_values::DISPLAY_NAME,
            resolved_spec.effective_display_name(),
        ));
        proxy.display_name = resolved_spec.effective_display_name().to_string();
        proxy
    }

    /// Per-container values from the resolved container spec.
    pub fn add_container_runtime_values(
        &self,
        container_spec: &ContainerSpec,
        mut container: Container,
    ) -> Container {
        let index = RuntimeValue::new(
            &runtime_values::CONTAINER_INDEX,
            container_spec.index.to_string(),
        );
        container.runtime_values.insert(index.key.id.to_string(), index);
        container
    }

    /// Validate user-supplied parameter overrides against the spec's schema
    /// and attach them as a runtime value.
    pub fn process_parameters(
        &self,
        _auth: Option<&Authentication>,
        spec: &ProxySpec,
        parameters: Option<&HashMap<String, String>>,
        mut proxy: Proxy,
    ) -> LifecycleResult<Proxy> {
        let supplied = parameters.cloned().unwrap_or_default();

        for key in supplied.keys() {
            if spec.parameter(key).is_none() {
                return Err(CoreError::InvalidParameters(format!("unknown parameter '{key}'")).into());
            }
        }

        let mut values: HashMap<String, String> = HashMap::new();
        for parameter in &spec.parameters {
            let value = match supplied.get(&parameter.id) {
                Some(value) => {
                    if !parameter.values.contains(value) {
                        return Err(CoreError::InvalidParameters(format!(
                            "value '{value}' not allowed for parameter '{}'",
                            parameter.id
                        ))
                        .into());
                    }
                    value.clone()
                }
                None => match &parameter.default_value {
                    Some(default) => default.clone(),
                    None => {
                        return Err(CoreError::InvalidParameters(format!(
                            "missing value for parameter '{}'",
                            parameter.id
                        ))
                        .into())
                    }
                },
            };
            values.insert(parameter.id.clone(), value);
        }

        if !values.is_empty() {
            let encoded = serde_json::to_string(&values)
                .map_err(|e| CoreError::InvalidParameters(e.to_string()))?;
            proxy.add_runtime_value(RuntimeValue::new(&runtime_values::PARAMETER_VALUES, encoded));
        }
        Ok(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::spec::ParameterSpec;

    fn service() -> RuntimeValueService {
        RuntimeValueService::new(&BerthConfig::default())
    }

    fn spec_with_parameter() -> ProxySpec {
        let mut spec = ProxySpec::new("spec-a");
        spec.parameters.push(ParameterSpec {
            id: "memory".to_string(),
            values: vec!["2G".to_string(), "4G".to_string()],
            default_value: Some("2G".to_string()),
        });
        spec
    }

    #[test]
    fn before_resolution_adds_identity_values() {
        let auth = Authentication::user("alice");
        let spec = ProxySpec::new("spec-a");
        let proxy = Proxy::new("p-1", "spec-a", Some("alice".to_string()));

        let proxy = service().add_runtime_values_before_resolution(Some(&auth), &spec, proxy);

        assert_eq!(
            proxy.runtime_value(runtime_values::USER_ID.id).unwrap().value,
            "alice"
        );
        assert!(proxy.runtime_value(runtime_values::CREATED_TIMESTAMP.id).is_some());
        assert!(proxy
            .runtime_value(runtime_values::PUBLIC_PATH.id)
            .unwrap()
            .value
            .ends_with("p-1"));
    }

    #[test]
    fn existing_public_path_is_kept() {
        let spec = ProxySpec::new("spec-a");
        let mut proxy = Proxy::new("p-1", "spec-a", None);
        proxy.add_runtime_value(RuntimeValue::new(&runtime_values::PUBLIC_PATH, "/custom/p-1"));

        let proxy = service().add_runtime_values_before_resolution(None, &spec, proxy);
        assert_eq!(
            proxy.runtime_value(runtime_values::PUBLIC_PATH.id).unwrap().value,
            "/custom/p-1"
        );
    }

    #[test]
    fn after_resolution_sets_display_name() {
        let mut spec = ProxySpec::new("spec-a");
        spec.display_name = Some("Resolved Name".to_string());
        let proxy = Proxy::new("p-1", "spec-a", None);

        let proxy = service().add_runtime_values_after_resolution(&spec, proxy);
        assert_eq!(proxy.display_name, "Resolved Name");
        assert_eq!(
            proxy.runtime_value(runtime_values::DISPLAY_NAME.id).unwrap().value,
            "Resolved Name"
        );
    }

    #[test]
    fn parameters_validated_against_schema() {
        let spec = spec_with_parameter();
        let proxy = Proxy::new("p-1", "spec-a", None);

        let mut params = HashMap::new();
        params.insert("memory".to_string(), "4G".to_string());
        let proxy = service()
            .process_parameters(None, &spec, Some(&params), proxy)
            .unwrap();

        let value = &proxy.runtime_value(runtime_values::PARAMETER_VALUES.id).unwrap().value;
        assert!(value.contains("4G"));
    }

    #[test]
    fn unknown_parameter_rejected() {
        let spec = spec_with_parameter();
        let proxy = Proxy::new("p-1", "spec-a", None);

        let mut params = HashMap::new();
        params.insert("cpu".to_string(), "2".to_string());
        let result = service().process_parameters(None, &spec, Some(&params), proxy);
        assert!(matches!(
            result,
            Err(crate::error::LifecycleError::Core(CoreError::InvalidParameters(_)))
        ));
    }

    #[test]
    fn disallowed_value_rejected() {
        let spec = spec_with_parameter();
        let proxy = Proxy::new("p-1", "spec-a", None);

        let mut params = HashMap::new();
        params.insert("memory".to_string(), "64G".to_string());
        let result = service().process_parameters(None, &spec, Some(&params), proxy);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_fill_missing_parameters() {
        let spec = spec_with_parameter();
        let proxy = Proxy::new("p-1", "spec-a", None);

        let proxy = service().process_parameters(None, &spec, None, proxy).unwrap();
        let value = &proxy.runtime_value(runtime_values::PARAMETER_VALUES.id).unwrap().value;
        assert!(value.contains("2G"));
    }

    #[test]
    fn no_parameters_no_value() {
        let spec = ProxySpec::new("spec-a");
        let proxy = Proxy::new("p-1", "spec-a", None);

        let proxy = service().process_parameters(None, &spec, None, proxy).unwrap();
        assert!(proxy.runtime_value(runtime_values::PARAMETER_VALUES.id).is_none());
    }
}
