use std::sync::Arc;

use dashmap::DashMap;

pub use relay_metadata::sanitize_subject_token;

/// Helper for platform subject formatting with an optional prefix.
/// Caches formatted subjects to avoid repeated allocations per publish.
pub struct SubjectBuilder {
    /// Pre-computed prefix: "{prefix}.platform." or "platform."
    platform_prefix: Arc<str>,
    /// Pre-computed wildcard subject
    wildcard: Arc<str>,
    /// Cache of "{platform_id}/{kind}" -> full subject
    cache: DashMap<String, Arc<str>>,
}

impl SubjectBuilder {
    /// Create a SubjectBuilder, optionally namespacing every subject under `prefix`
    pub fn new(prefix: Option<&str>) -> Self {
        let root = match prefix.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => format!("{}.platform", p.trim_end_matches('.')),
            None => "platform".to_string(),
        };

        Self {
            platform_prefix: format!("{}.", root).into(),
            wildcard: format!("{}.>", root).into(),
            cache: DashMap::new(),
        }
    }

    /// Build subject for a platform measurement: [{prefix}.]platform.{id}.{kind}
    /// Cached - first call allocates, subsequent calls return Arc clone.
    pub fn platform(&self, platform_id: &str, kind: &str) -> Arc<str> {
        let key = format!("{}/{}", platform_id, kind);
        if let Some(cached) = self.cache.get(&key) {
            return Arc::clone(cached.value());
        }

        let subject: Arc<str> = format!(
            "{}{}.{}",
            self.platform_prefix,
            sanitize_subject_token(platform_id),
            kind
        )
        .into();
        self.cache.insert(key, Arc::clone(&subject));
        subject
    }

    /// Wildcard subject covering every platform: [{prefix}.]platform.>
    #[inline]
    pub fn all(&self) -> &str {
        &self.wildcard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_subject() {
        let builder = SubjectBuilder::new(None);
        assert_eq!(builder.platform("HALO", "location").as_ref(), "platform.HALO.location");
    }

    #[test]
    fn test_platform_subject_with_prefix() {
        let builder = SubjectBuilder::new(Some("eurec4a"));
        assert_eq!(
            builder.platform("RHB", "location").as_ref(),
            "eurec4a.platform.RHB.location"
        );
        assert_eq!(builder.all(), "eurec4a.platform.>");
    }

    #[test]
    fn test_blank_prefix_ignored() {
        let builder = SubjectBuilder::new(Some("  "));
        assert_eq!(builder.all(), "platform.>");
    }

    #[test]
    fn test_platform_subject_cached() {
        let builder = SubjectBuilder::new(None);
        let first = builder.platform("SV3-245", "location");
        let second = builder.platform("SV3-245", "location");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_platform_id_sanitized() {
        let builder = SubjectBuilder::new(None);
        assert_eq!(builder.platform("SWIFT 16", "wave").as_ref(), "platform.SWIFT16.wave");
        assert_eq!(builder.platform("VP-FAZ", "location").as_ref(), "platform.VP-FAZ.location");
    }

    #[test]
    fn test_sanitize_strips_nats_wildcards() {
        assert_eq!(sanitize_subject_token("A.B"), "AB");
        assert_eq!(sanitize_subject_token("A>B"), "AB");
        assert_eq!(sanitize_subject_token("A*B"), "AB");
        assert_eq!(sanitize_subject_token("A/B"), "A-B");
        assert_eq!(sanitize_subject_token("SV3_245"), "SV3_245");
    }
}
