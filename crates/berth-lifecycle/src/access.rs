//! Access control over (user, spec) pairs.

use std::sync::Arc;

use berth_core::auth::Authentication;
use berth_core::provider::SpecProvider;
use berth_core::spec::ProxySpec;

/// Pure predicate deciding whether a caller may use a spec.
///
/// `authorization_enabled` mirrors whether the configured auth backend
/// enforces authorization at all; simple backends (none, webservice) do not,
/// and then only anonymous callers or unrestricted specs pass.
pub struct AccessControl {
    authorization_enabled: bool,
    provider: Arc<dyn SpecProvider>,
}

impl AccessControl {
    pub fn new(authorization_enabled: bool, provider: Arc<dyn SpecProvider>) -> Self {
        Self {
            authorization_enabled,
            provider,
        }
    }

    /// First positive rule wins; no side effects.
    pub fn can_access(&self, auth: Option<&Authentication>, spec: Option<&ProxySpec>) -> bool {
        let (auth, spec) = match (auth, spec) {
            (Some(auth), Some(spec)) => (auth, spec),
            _ => return false,
        };

        if !self.authorization_enabled {
            return auth.anonymous || spec.access_control.is_none();
        }

        let access_control = match &spec.access_control {
            Some(block) if !block.is_empty() => block,
            _ => return true,
        };

        if access_control.users.iter().any(|u| u == &auth.name) {
            return true;
        }
        if access_control.groups.iter().any(|g| auth.is_member(g)) {
            return true;
        }
        false
    }

    /// Convenience overload resolving the spec id; unknown ids deny.
    pub fn can_access_id(&self, auth: Option<&Authentication>, spec_id: &str) -> bool {
        match self.provider.get_spec(spec_id) {
            Some(spec) => self.can_access(auth, Some(&spec)),
            None => false,
        }
    }
}
