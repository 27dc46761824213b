//! Transcript store — one canonical write per intent.
//!
//! The store owns sanitization (wallet secrets never reach disk), the
//! canonical serialization, the `final_hash` (over everything except
//! `failure_event` and `final_hash` itself), and the write-exactly-once
//! contract behind the `transcript_commit` gate.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use serde_json::Value;
use tracing::info;

use pact_types::{IntentId, PactError, Result, Transcript, canonical_json, to_canonical_value};

/// Input keys that may carry secret material. Removed recursively before
/// anything lands in a transcript.
const SECRET_KEYS: &[&str] = &[
    "privateKey",
    "private_key",
    "secretKey",
    "secret_key",
    "keypair",
    "mnemonic",
    "seed",
];

/// Strip secret-bearing keys from an input value, recursively.
#[must_use]
pub fn sanitize_input(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                if SECRET_KEYS.contains(&key.as_str()) {
                    continue;
                }
                out.insert(key.clone(), sanitize_input(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_input).collect()),
        other => other.clone(),
    }
}

/// Writes one transcript file per intent under a caller-chosen directory.
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
    committed: bool,
}

impl TranscriptStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            committed: false,
        }
    }

    /// Where this intent's transcript lives.
    #[must_use]
    pub fn path_for(&self, intent_id: IntentId) -> PathBuf {
        self.dir.join(format!("{intent_id}.json"))
    }

    /// The single atomic gate: stamp, hash, serialize canonically, write.
    ///
    /// Returns an error on a second call — the transcript commits exactly
    /// once per intent.
    pub fn commit(&mut self, transcript: &mut Transcript, now_ms: u64) -> Result<PathBuf> {
        if self.committed {
            return Err(PactError::internal(
                "transcript already committed for this run",
            ));
        }
        transcript.written_at_ms = now_ms;
        transcript.written_at_rfc3339 = rfc3339_of_ms(now_ms);
        transcript.final_hash = Some(transcript.compute_hash()?);

        let rendered = canonical_json(&to_canonical_value(&*transcript)?);
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(transcript.intent_id);
        std::fs::write(&path, rendered)?;
        self.committed = true;
        info!(path = %path.display(), "transcript committed");
        Ok(path)
    }

    /// Load a previously written transcript (reconciliation entry point).
    pub fn load(path: &Path) -> Result<Transcript> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Overwrite after reconciliation updated the lifecycle.
    pub fn rewrite(path: &Path, transcript: &mut Transcript) -> Result<()> {
        transcript.final_hash = Some(transcript.compute_hash()?);
        let rendered = canonical_json(&to_canonical_value(&*transcript)?);
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

/// Render injected milliseconds as RFC 3339. Never reads a wall clock.
#[must_use]
pub fn rfc3339_of_ms(now_ms: u64) -> String {
    i64::try_from(now_ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(String::new, |dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use pact_types::AgentId;

    use super::*;

    fn transcript() -> Transcript {
        Transcript::new(
            IntentId::derive("fp", 0),
            "ab".repeat(32),
            AgentId::from("buyer-1"),
        )
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pact-store-test-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn sanitize_removes_secret_keys_recursively() {
        let input = json!({
            "wallet": {
                "provider": "test",
                "params": {
                    "privateKey": "deadbeef".repeat(16),
                    "secretKey": "cafe",
                    "keypair": {"secret": "x"},
                    "address": "0xabc"
                }
            },
            "maxPrice": "0.0001"
        });
        let clean = sanitize_input(&input);
        let rendered = clean.to_string();
        assert!(!rendered.contains("privateKey"));
        assert!(!rendered.contains("deadbeef"));
        assert!(!rendered.contains("secretKey"));
        assert!(!rendered.contains("keypair"));
        assert!(rendered.contains("0xabc"), "non-secrets survive");
    }

    #[test]
    fn commit_writes_canonical_json_with_final_hash() {
        let mut store = TranscriptStore::new(temp_dir("commit"));
        let mut t = transcript();
        let path = store.commit(&mut t, 5_000).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let loaded: Transcript = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded.written_at_ms, 5_000);
        assert_eq!(loaded.final_hash, Some(loaded.compute_hash().unwrap()));
        // Canonical: re-render must match byte for byte.
        let rerendered = canonical_json(&to_canonical_value(&loaded).unwrap());
        assert_eq!(raw, rerendered);
    }

    #[test]
    fn second_commit_rejected() {
        let mut store = TranscriptStore::new(temp_dir("twice"));
        let mut t = transcript();
        store.commit(&mut t, 5_000).unwrap();
        assert!(store.commit(&mut t, 6_000).is_err());
    }

    #[test]
    fn load_roundtrips() {
        let mut store = TranscriptStore::new(temp_dir("load"));
        let mut t = transcript();
        let path = store.commit(&mut t, 5_000).unwrap();
        let loaded = TranscriptStore::load(&path).unwrap();
        assert_eq!(loaded.intent_id, t.intent_id);
    }

    #[test]
    fn rfc3339_rendering_is_deterministic() {
        assert_eq!(rfc3339_of_ms(0), "1970-01-01T00:00:00+00:00");
        assert_eq!(rfc3339_of_ms(5_000), rfc3339_of_ms(5_000));
    }
}
