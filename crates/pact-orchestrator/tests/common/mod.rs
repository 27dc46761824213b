//! Shared harness for acquire integration tests: a deterministic clock,
//! seeded keypairs, an in-memory rail with funded accounts, and in-process
//! providers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rust_decimal::Decimal;

use pact_orchestrator::{
    AcquireDeps, AcquireInput, LocalProvider, LocalProviderConfig, ProviderDirectory,
    ProviderProfile, ProviderTransport, TestWallet, WalletAdapter,
};
use pact_policy::{HashBindingVerifier, InMemoryReputationStore, ReputationStore};
use pact_settlement::{ExternalRail, MockRail, SettlementRail, StripeLikeRail};
use pact_types::{
    AgentId, CancelToken, Clock, Constraints, Keypair, PolicyDoc, ProviderId, WalletProviderKind,
};

pub const BUYER_SEED: [u8; 32] = [1u8; 32];

/// One configured provider: its key seed plus behavior.
pub struct SellerSpec {
    pub seed: [u8; 32],
    pub config: LocalProviderConfig,
}

impl SellerSpec {
    pub fn honest(id: &str, seed_byte: u8) -> Self {
        Self {
            seed: [seed_byte; 32],
            config: LocalProviderConfig::honest(ProviderId::new(id)),
        }
    }
}

pub struct Harness {
    pub deps: AcquireDeps,
    pub rail: Arc<MockRail>,
    pub reputation: Arc<InMemoryReputationStore>,
    #[allow(dead_code)]
    pub clock: Clock,
}

/// Build a full dependency set around the given sellers and policy.
pub fn harness(policy: PolicyDoc, sellers: Vec<SellerSpec>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let clock = Clock::counter();
    let buyer_id = AgentId::from("buyer-1");

    let rail = Arc::new(MockRail::new());
    rail.deposit(&buyer_id, Decimal::ONE);

    let mut directory = ProviderDirectory::new();
    let mut transports: HashMap<ProviderId, Arc<dyn ProviderTransport>> = HashMap::new();
    for spec in sellers {
        let provider_id = spec.config.provider_id.clone();
        let provider = Arc::new(LocalProvider::new(spec.seed, spec.config, clock.clone()));
        directory.register(ProviderProfile {
            provider_id: provider_id.clone(),
            pubkey_b58: provider.public_b58(),
            endpoint: None,
            region: None,
            baseline_latency_ms: 40,
            intent_types: vec!["weather.data".into()],
        });
        // Sellers hold enough for the policy bond.
        rail.deposit(&AgentId::new(provider_id.as_str()), Decimal::new(1, 1));
        transports.insert(provider_id, provider);
    }

    let mut rails: HashMap<String, Arc<dyn SettlementRail>> = HashMap::new();
    rails.insert("mock".into(), Arc::clone(&rail) as Arc<dyn SettlementRail>);
    rails.insert("stripe_like".into(), Arc::new(StripeLikeRail::new(1)));
    rails.insert("external".into(), Arc::new(ExternalRail));

    let mut wallet_adapters: HashMap<WalletProviderKind, Arc<dyn WalletAdapter>> = HashMap::new();
    wallet_adapters.insert(WalletProviderKind::Test, Arc::new(TestWallet));

    let reputation = Arc::new(InMemoryReputationStore::new());

    let deps = AcquireDeps {
        buyer_keys: Arc::new(Keypair::from_seed(BUYER_SEED)),
        buyer_id,
        policy,
        directory,
        transports,
        rails,
        reputation: Arc::clone(&reputation) as Arc<dyn ReputationStore>,
        wallet_adapters,
        zk_verifier: Arc::new(HashBindingVerifier),
        clock: Some(clock.clone()),
        cancel: CancelToken::new(),
    };

    Harness {
        deps,
        rail,
        reputation,
        clock,
    }
}

/// Scenario-1-shaped input: weather.data for NYC under 0.0001.
pub fn weather_input() -> AcquireInput {
    AcquireInput::simple(
        "weather.data",
        "NYC",
        Constraints {
            latency_ms: 50,
            freshness_sec: 10,
        },
        Decimal::new(1, 4),
    )
}

/// A unique temp directory for transcripts.
pub fn transcript_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pact-acquire-test-{tag}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub async fn balance(rail: &MockRail, agent: &str) -> Decimal {
    rail.balance(&AgentId::from(agent), None, None).await.unwrap()
}
