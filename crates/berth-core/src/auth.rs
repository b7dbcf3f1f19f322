//! Authentication value handed in by the (out-of-scope) auth layer.

use serde::{Deserialize, Serialize};

/// An authenticated caller, as seen by the core.
///
/// The core never talks to an authentication backend; it only inspects the
/// value the HTTP layer resolved. `principal` carries whatever claims the
/// backend exposes, so spec expressions can reference them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    pub name: String,
    pub groups: Vec<String>,
    pub admin: bool,
    pub anonymous: bool,
    /// Claims exposed to spec expressions under `principal.*`.
    pub principal: serde_json::Value,
    /// Opaque credentials (e.g. a bearer token), exposed as `credentials`.
    pub credentials: Option<String>,
}

impl Authentication {
    pub fn user(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            principal: serde_json::json!({ "name": name.clone() }),
            name,
            groups: Vec::new(),
            admin: false,
            anonymous: false,
            credentials: None,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            groups: Vec::new(),
            admin: false,
            anonymous: true,
            principal: serde_json::Value::Null,
            credentials: None,
        }
    }

    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_admin(mut self) -> Self {
        self.admin = true;
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Case-insensitive group membership, matching how most auth backends
    /// normalize group names.
    pub fn is_member(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_case_insensitive() {
        let auth = Authentication::user("alice").with_groups(&["Scientists"]);
        assert!(auth.is_member("scientists"));
        assert!(auth.is_member("SCIENTISTS"));
        assert!(!auth.is_member("engineers"));
    }

    #[test]
    fn anonymous_has_no_principal() {
        let auth = Authentication::anonymous();
        assert!(auth.anonymous);
        assert!(auth.principal.is_null());
    }
}
