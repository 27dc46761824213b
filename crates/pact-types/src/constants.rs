//! Protocol-wide constants and defaults.

use rust_decimal::Decimal;

/// Protocol version string embedded in transcripts.
pub const PROTOCOL_VERSION: &str = "pact/v3";

/// Transcript schema version.
pub const TRANSCRIPT_SCHEMA_VERSION: u32 = 1;

/// Milliseconds the internal counter clock advances per read.
pub const COUNTER_CLOCK_STEP_MS: u64 = 1_000;

/// Deliberate skew added to every streaming tick so the stream clock makes
/// forward progress even under the deterministic counter clock.
pub const STREAM_CLOCK_SKEW_MS: u64 = 5;

/// Decimal places for per-tick streaming amounts.
pub const STREAM_AMOUNT_DP: u32 = 8;

/// Lower clamp for the streaming batch-event size.
pub const STREAM_BATCH_MIN: u64 = 5;

/// Upper clamp for the streaming batch-event size.
pub const STREAM_BATCH_MAX: u64 = 50;

/// Trust score floor for the `trusted` tier.
pub const TRUST_TRUSTED_FLOOR: f64 = 0.75;

/// Trust score floor for the `low` tier.
pub const TRUST_LOW_FLOOR: f64 = 0.4;

/// Default settlement asset when the acquire input names none.
pub const DEFAULT_ASSET_ID: &str = "USDC";

/// Default settlement chain when the acquire input names none.
pub const DEFAULT_CHAIN_ID: &str = "solana";

/// Default fanout: how many candidates the fallback plan may hold.
pub const DEFAULT_FANOUT: usize = 4;

/// Maximum envelope hashes the session replay guard retains.
pub const REPLAY_GUARD_CAPACITY: usize = 1_024;

/// Maximum entries a settlement rail's idempotency cache retains.
pub const IDEMPOTENCY_CACHE_CAPACITY: usize = 4_096;

/// Tolerance for cumulative streaming payments against the agreed budget.
#[must_use]
pub fn payment_epsilon() -> Decimal {
    // 1e-12
    Decimal::new(1, 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsilon_is_tiny_but_positive() {
        assert!(payment_epsilon() > Decimal::ZERO);
        assert!(payment_epsilon() < Decimal::new(1, 6));
    }

    #[test]
    fn batch_clamp_bounds_ordered() {
        assert!(STREAM_BATCH_MIN < STREAM_BATCH_MAX);
    }
}
