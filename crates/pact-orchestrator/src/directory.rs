//! Provider directory — lookup of candidate providers by intent type.

use pact_types::{DirectoryEntry, ProviderId};

/// A provider as registered with the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: ProviderId,
    pub pubkey_b58: String,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub baseline_latency_ms: u64,
    /// Intent types this provider claims to serve.
    pub intent_types: Vec<String>,
}

impl ProviderProfile {
    #[must_use]
    pub fn directory_entry(&self) -> DirectoryEntry {
        DirectoryEntry {
            provider_id: self.provider_id.clone(),
            pubkey_b58: self.pubkey_b58.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            baseline_latency_ms: self.baseline_latency_ms,
        }
    }
}

/// Registry of known providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderDirectory {
    providers: Vec<ProviderProfile>,
}

impl ProviderDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, profile: ProviderProfile) {
        self.providers.push(profile);
    }

    /// Candidates for one intent type, ordered by provider id so discovery
    /// is deterministic regardless of registration order.
    #[must_use]
    pub fn lookup(&self, intent_type: &str) -> Vec<&ProviderProfile> {
        let mut found: Vec<&ProviderProfile> = self
            .providers
            .iter()
            .filter(|p| p.intent_types.iter().any(|t| t == intent_type))
            .collect();
        found.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        found
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, types: &[&str]) -> ProviderProfile {
        ProviderProfile {
            provider_id: ProviderId::from(id),
            pubkey_b58: format!("pk-{id}"),
            endpoint: None,
            region: Some("us-east".into()),
            baseline_latency_ms: 40,
            intent_types: types.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn lookup_filters_by_intent_type() {
        let mut dir = ProviderDirectory::new();
        dir.register(profile("b", &["weather.data"]));
        dir.register(profile("a", &["weather.data", "stock.ticks"]));
        dir.register(profile("c", &["stock.ticks"]));

        let found = dir.lookup("weather.data");
        assert_eq!(found.len(), 2);
        // Sorted by provider id, not registration order.
        assert_eq!(found[0].provider_id, ProviderId::from("a"));
        assert_eq!(found[1].provider_id, ProviderId::from("b"));
    }

    #[test]
    fn unknown_type_finds_nothing() {
        let mut dir = ProviderDirectory::new();
        dir.register(profile("a", &["weather.data"]));
        assert!(dir.lookup("dna.sequencing").is_empty());
    }
}
