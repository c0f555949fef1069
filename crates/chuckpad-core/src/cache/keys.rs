use std::collections::BTreeMap;
use std::fmt;

use urlencoding::encode;

use crate::environment::Environment;

/// Deterministic cache key for an idempotent request.
///
/// Renders as `<environment>:<endpoint>?<name>=<value>&...` with parameters
/// sorted by name, so the same request always maps to the same key and the
/// same request against two environments never collides. Endpoint segments,
/// parameter names and values are percent-encoded, so `?`, `&` and `=` inside
/// them cannot be mistaken for separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    environment: Environment,
    endpoint: String,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(environment: Environment, endpoint: impl Into<String>) -> Self {
        Self {
            environment,
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a request parameter. A repeated name keeps the last value.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.environment)?;
        for (i, segment) in self.endpoint.split('/').enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&encode(segment))?;
        }
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, encode(name), encode(value))?;
        }
        Ok(())
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}
