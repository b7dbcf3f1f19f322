//! Two-phase expression resolution over a spec.
//!
//! Expression-bearing spec fields contain `#{path.to.value}` placeholders
//! resolved against a context built from the proxy under construction, the
//! spec itself and the caller's principal. The proxy and the resolved spec
//! reference each other, which forces the split into phases:
//!
//! 1. `first_resolve` — identity fields (display name, container images),
//!    which only need the unresolved context.
//! 2. `final_resolve` — environment and command fields, resolved against a
//!    context rebuilt with the partially resolved spec, so they can refer
//!    to first-phase results and to runtime values added in between.
//!
//! `resolve` runs both phases against a single context and is what the
//! non-shared start path uses.

use regex::Regex;
use serde_json::Value;

use crate::auth::Authentication;
use crate::error::{CoreError, CoreResult};
use crate::model::Proxy;
use crate::spec::ProxySpec;

/// Context a spec is resolved against.
///
/// Internally a JSON tree with the roots `proxy`, `spec`, `principal` and
/// `credentials`; placeholder paths are dotted lookups into it.
#[derive(Debug, Clone)]
pub struct SpecExpressionContext {
    root: Value,
}

impl SpecExpressionContext {
    pub fn create(
        proxy: Option<&Proxy>,
        spec: Option<&ProxySpec>,
        auth: Option<&Authentication>,
    ) -> CoreResult<Self> {
        let mut root = serde_json::Map::new();
        if let Some(proxy) = proxy {
            root.insert(
                "proxy".to_string(),
                serde_json::to_value(proxy).map_err(|e| CoreError::Expression(e.to_string()))?,
            );
        }
        if let Some(spec) = spec {
            root.insert(
                "spec".to_string(),
                serde_json::to_value(spec).map_err(|e| CoreError::Expression(e.to_string()))?,
            );
        }
        if let Some(auth) = auth {
            root.insert("principal".to_string(), auth.principal.clone());
            if let Some(credentials) = &auth.credentials {
                root.insert("credentials".to_string(), Value::String(credentials.clone()));
            }
        }
        Ok(Self {
            root: Value::Object(root),
        })
    }

    /// Rebuild the context with a (partially) resolved spec, keeping the
    /// other roots.
    pub fn with_spec(&self, spec: &ProxySpec) -> CoreResult<Self> {
        let mut root = self.root.clone();
        if let Value::Object(map) = &mut root {
            map.insert(
                "spec".to_string(),
                serde_json::to_value(spec).map_err(|e| CoreError::Expression(e.to_string()))?,
            );
        }
        Ok(Self { root })
    }

    /// Look up a dotted path and render it as a string.
    fn lookup(&self, path: &str) -> Option<String> {
        let mut current = &self.root;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        match current {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Substitutes `#{...}` placeholders in spec fields.
pub struct SpecResolver {
    pattern: Regex,
}

impl SpecResolver {
    pub fn new() -> Self {
        Self {
            // Paths are dotted identifiers; anything else inside the braces
            // is a malformed expression and fails resolution.
            pattern: Regex::new(r"#\{([A-Za-z0-9_.\-]+)\}").expect("placeholder pattern"),
        }
    }

    /// Resolve all placeholders in `input`. Unknown paths are an error, not
    /// an empty substitution: a spec referencing a missing value must fail
    /// the start rather than launch a half-configured container.
    pub fn resolve_str(&self, input: &str, context: &SpecExpressionContext) -> CoreResult<String> {
        let mut output = String::with_capacity(input.len());
        let mut last = 0;
        for captures in self.pattern.captures_iter(input) {
            let whole = captures.get(0).expect("match");
            let path = &captures[1];
            let value = context
                .lookup(path)
                .ok_or_else(|| CoreError::Expression(format!("unknown reference '{path}'")))?;
            output.push_str(&input[last..whole.start()]);
            output.push_str(&value);
            last = whole.end();
        }
        output.push_str(&input[last..]);
        Ok(output)
    }
}

impl Default for SpecResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySpec {
    /// Resolve identity fields: display name and container images.
    pub fn first_resolve(
        &self,
        resolver: &SpecResolver,
        context: &SpecExpressionContext,
    ) -> CoreResult<ProxySpec> {
        let mut resolved = self.clone();
        if let Some(display_name) = &resolved.display_name {
            resolved.display_name = Some(resolver.resolve_str(display_name, context)?);
        }
        for container in &mut resolved.container_specs {
            container.image = resolver.resolve_str(&container.image, context)?;
        }
        Ok(resolved)
    }

    /// Resolve environment and command fields.
    pub fn final_resolve(
        &self,
        resolver: &SpecResolver,
        context: &SpecExpressionContext,
    ) -> CoreResult<ProxySpec> {
        let mut resolved = self.clone();
        for container in &mut resolved.container_specs {
            for value in container.env.values_mut() {
                *value = resolver.resolve_str(value, context)?;
            }
            for entry in &mut container.cmd {
                *entry = resolver.resolve_str(entry, context)?;
            }
        }
        Ok(resolved)
    }

    /// Both phases against a single context.
    pub fn resolve(
        &self,
        resolver: &SpecResolver,
        context: &SpecExpressionContext,
    ) -> CoreResult<ProxySpec> {
        self.first_resolve(resolver, context)?
            .final_resolve(resolver, context)
    }
}
