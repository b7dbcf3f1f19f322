//! Runtime value keys and values.
//!
//! A runtime value is a keyed piece of data attached to a proxy or container
//! around spec resolution. Keys carry a stable identifier, the environment
//! variable they surface as inside the container, and whether they are
//! injected as env at all.

use serde::Serialize;

/// Identity and metadata of a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeValueKey {
    /// Stable identifier, also the map key on proxies and containers.
    pub id: &'static str,
    /// Environment variable name used when `include_as_env` is set.
    pub env_name: &'static str,
    /// Whether the value is injected into the container environment.
    pub include_as_env: bool,
}

/// A keyed value carried on a proxy or container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeValue {
    pub key: RuntimeValueKey,
    pub value: String,
}

impl RuntimeValue {
    pub fn new(key: &RuntimeValueKey, value: impl Into<String>) -> Self {
        Self {
            key: *key,
            value: value.into(),
        }
    }
}

// ── Key registry ───────────────────────────────────────────────────

/// Public path prefix under which the proxy's routes are mounted.
pub const PUBLIC_PATH: RuntimeValueKey = RuntimeValueKey {
    id: "berth/public-path",
    env_name: "BERTH_PUBLIC_PATH",
    include_as_env: false,
};

/// Id of the owning user.
pub const USER_ID: RuntimeValueKey = RuntimeValueKey {
    id: "berth/user-id",
    env_name: "BERTH_USER_ID",
    include_as_env: true,
};

/// Resolved display name of the proxy.
pub const DISPLAY_NAME: RuntimeValueKey = RuntimeValueKey {
    id: "berth/display-name",
    env_name: "BERTH_DISPLAY_NAME",
    include_as_env: false,
};

/// Unix millis at which the record was created.
pub const CREATED_TIMESTAMP: RuntimeValueKey = RuntimeValueKey {
    id: "berth/created-timestamp",
    env_name: "BERTH_CREATED_TIMESTAMP",
    include_as_env: false,
};

/// Seconds of silence after which the proxy is considered abandoned.
pub const HEARTBEAT_TIMEOUT: RuntimeValueKey = RuntimeValueKey {
    id: "berth/heartbeat-timeout",
    env_name: "BERTH_HEARTBEAT_TIMEOUT",
    include_as_env: true,
};

/// JSON object of validated user-supplied parameter overrides.
pub const PARAMETER_VALUES: RuntimeValueKey = RuntimeValueKey {
    id: "berth/parameter-values",
    env_name: "BERTH_PARAMETER_VALUES",
    include_as_env: true,
};

/// Ordinal of a container within its spec.
pub const CONTAINER_INDEX: RuntimeValueKey = RuntimeValueKey {
    id: "berth/container-index",
    env_name: "BERTH_CONTAINER_INDEX",
    include_as_env: true,
};

/// Seat a delegating proxy is bound to, set at claim time.
pub const SEAT_ID: RuntimeValueKey = RuntimeValueKey {
    id: "berth/seat-id",
    env_name: "BERTH_SEAT_ID",
    include_as_env: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ids_are_unique() {
        let keys = [
            PUBLIC_PATH,
            USER_ID,
            DISPLAY_NAME,
            CREATED_TIMESTAMP,
            HEARTBEAT_TIMEOUT,
            PARAMETER_VALUES,
            CONTAINER_INDEX,
            SEAT_ID,
        ];
        let mut ids: Vec<&str> = keys.iter().map(|k| k.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), keys.len());
    }

    #[test]
    fn value_carries_its_key() {
        let value = RuntimeValue::new(&USER_ID, "alice");
        assert_eq!(value.key.id, USER_ID.id);
        assert_eq!(value.key.env_name, "BERTH_USER_ID");
        assert!(value.key.include_as_env);
        assert_eq!(value.value, "alice");
    }
}
