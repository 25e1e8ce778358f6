use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{ResolverError, SourceError};
use crate::record::Emission;

/// A polled upstream that turns its latest data into normalized records
#[async_trait]
pub trait Source: Send {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Run one fetch and normalize what it returned. An empty vector means the
    /// source had nothing to report this cycle.
    async fn poll(&mut self) -> Result<Vec<Emission>, SourceError>;
}

#[async_trait]
impl<S: Source + ?Sized> Source for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn poll(&mut self) -> Result<Vec<Emission>, SourceError> {
        (**self).poll().await
    }
}

/// KeyResolver trait for credential sources (env vars, Vault, etc.)
pub trait KeyResolver: Send + Sync {
    /// Resolve keys from a source string (e.g., "env:VAR1,VAR2")
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError>;

    /// Resolve a source naming exactly one key and return its value
    fn resolve_one(&self, source: &str) -> Result<String, ResolverError> {
        let mut values = self.resolve(source)?;
        let key = values
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| ResolverError::MissingKey(source.to_string()))?;
        if values.len() > 1 {
            return Err(ResolverError::UnsupportedSource(format!(
                "expected a single key, got: {}",
                source
            )));
        }
        values
            .remove(&key)
            .ok_or(ResolverError::MissingKey(key))
    }
}
