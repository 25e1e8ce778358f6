use std::collections::HashMap;
use std::env;

use crate::error::ResolverError;
use crate::traits::KeyResolver;

/// Resolves keys from environment variables
pub struct EnvResolver;

impl EnvResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyResolver for EnvResolver {
    /// Parses "env:VAR1,VAR2" and returns values from environment.
    /// A bare value without the prefix is rejected.
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError> {
        let vars = source.strip_prefix("env:").ok_or_else(|| {
            ResolverError::UnsupportedSource(format!("expected 'env:' prefix, got: {}", source))
        })?;

        let names: Vec<&str> = vars.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
        if names.is_empty() {
            return Err(ResolverError::UnsupportedSource("empty env source".to_string()));
        }

        names
            .into_iter()
            .map(|name| {
                env::var(name)
                    .map(|value| (name.to_string(), value))
                    .map_err(|_| ResolverError::MissingKey(name.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_vars() {
        env::set_var("RELAY_TEST_KEY1", "value1");
        env::set_var("RELAY_TEST_KEY2", "value2");

        let resolver = EnvResolver::new();
        let result = resolver.resolve("env:RELAY_TEST_KEY1,RELAY_TEST_KEY2").unwrap();

        assert_eq!(result.get("RELAY_TEST_KEY1"), Some(&"value1".to_string()));
        assert_eq!(result.get("RELAY_TEST_KEY2"), Some(&"value2".to_string()));

        env::remove_var("RELAY_TEST_KEY1");
        env::remove_var("RELAY_TEST_KEY2");
    }

    #[test]
    fn test_resolve_one() {
        env::set_var("RELAY_TEST_PASSWORD", "hunter2");

        let resolver = EnvResolver::new();
        assert_eq!(resolver.resolve_one("env:RELAY_TEST_PASSWORD").unwrap(), "hunter2");
        assert!(resolver.resolve_one("env:RELAY_TEST_PASSWORD,PATH").is_err());
        assert!(resolver.resolve_one("env:").is_err());

        env::remove_var("RELAY_TEST_PASSWORD");
    }

    #[test]
    fn test_missing_var() {
        let resolver = EnvResolver::new();
        let result = resolver.resolve("env:NONEXISTENT_VAR_12345");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_source() {
        let resolver = EnvResolver::new();
        let result = resolver.resolve("vault:secret/path");
        assert!(result.is_err());
    }
}
