//! Failure codes and the central error type.
//!
//! Every failure in the core reduces to a stable code plus a human-readable
//! reason. The code strings are part of the protocol surface: transcripts,
//! receipts, and callers all match on them, so they never change spelling.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// How the retry loop must treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminality {
    /// Continue to the next candidate in the fallback plan.
    Retryable,
    /// Seal the transcript; no further attempts.
    Terminal,
    /// Not terminal, not retryable: the settlement lifecycle stays pending
    /// with its handle preserved for reconciliation.
    Pending,
}

macro_rules! failure_codes {
    ($( $variant:ident => $code:literal ),+ $(,)?) => {
        /// The complete failure-code vocabulary at the orchestrator boundary,
        /// plus the sub-boundary codes the retry classifier knows about.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FailureCode {
            $(
                #[doc = $code]
                $variant,
            )+
        }

        impl FailureCode {
            /// The exact wire string for this code.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $code, )+
                }
            }

            /// Parse a wire string back into a code.
            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

failure_codes! {
    InvalidPolicy => "INVALID_POLICY",
    NoProviders => "NO_PROVIDERS",
    NoEligibleProviders => "NO_ELIGIBLE_PROVIDERS",
    ProviderMissingRequiredCredentials => "PROVIDER_MISSING_REQUIRED_CREDENTIALS",
    ProviderUntrustedIssuer => "PROVIDER_UNTRUSTED_ISSUER",
    ProviderCredentialInvalid => "PROVIDER_CREDENTIAL_INVALID",
    ProviderCredentialRequired => "PROVIDER_CREDENTIAL_REQUIRED",
    ProviderTrustTierTooLow => "PROVIDER_TRUST_TIER_TOO_LOW",
    ProviderTrustScoreTooLow => "PROVIDER_TRUST_SCORE_TOO_LOW",
    ProviderSignatureInvalid => "PROVIDER_SIGNATURE_INVALID",
    ProviderSignerMismatch => "PROVIDER_SIGNER_MISMATCH",
    ProviderQuoteHttpError => "PROVIDER_QUOTE_HTTP_ERROR",
    ProviderQuoteParseError => "PROVIDER_QUOTE_PARSE_ERROR",
    ProviderQuoteInvalid => "PROVIDER_QUOTE_INVALID",
    ProviderQuoteOutOfBand => "PROVIDER_QUOTE_OUT_OF_BAND",
    ProviderQuotePolicyRejected => "PROVIDER_QUOTE_POLICY_REJECTED",
    NegotiationFailed => "NEGOTIATION_FAILED",
    SettlementFailed => "SETTLEMENT_FAILED",
    SettlementPollTimeout => "SETTLEMENT_POLL_TIMEOUT",
    SettlementProviderNotImplemented => "SETTLEMENT_PROVIDER_NOT_IMPLEMENTED",
    StreamingNotConfigured => "STREAMING_NOT_CONFIGURED",
    HttpStreamingError => "HTTP_STREAMING_ERROR",
    HttpProviderError => "HTTP_PROVIDER_ERROR",
    FailedProof => "FAILED_PROOF",
    FailedIdentity => "FAILED_IDENTITY",
    NoAgreement => "NO_AGREEMENT",
    NoReceipt => "NO_RECEIPT",
    WalletConnectFailed => "WALLET_CONNECT_FAILED",
    WalletCapabilityMissing => "WALLET_CAPABILITY_MISSING",
    WalletProofFailed => "WALLET_PROOF_FAILED",
    ZkKyaRequired => "ZK_KYA_REQUIRED",
    ZkKyaExpired => "ZK_KYA_EXPIRED",
    ZkKyaInvalid => "ZK_KYA_INVALID",
    ZkKyaTierTooLow => "ZK_KYA_TIER_TOO_LOW",
    ZkKyaIssuerNotAllowed => "ZK_KYA_ISSUER_NOT_ALLOWED",
    Pact330 => "PACT-330",
    Pact331 => "PACT-331",
    SettlementSlaViolation => "SETTLEMENT_SLA_VIOLATION",
    BuyerStopped => "BUYER_STOPPED",
    InvalidMessageType => "INVALID_MESSAGE_TYPE",
    Internal => "INTERNAL",
}

impl FailureCode {
    /// §7 terminality classification. All retry decisions in the
    /// orchestrator delegate here so policy stays centralized.
    #[must_use]
    pub fn terminality(self) -> Terminality {
        match self {
            Self::ProviderSignatureInvalid
            | Self::ProviderSignerMismatch
            | Self::ProviderQuoteHttpError
            | Self::ProviderQuoteParseError
            | Self::SettlementFailed
            | Self::SettlementProviderNotImplemented
            | Self::HttpProviderError
            | Self::HttpStreamingError
            | Self::InvalidMessageType => Terminality::Retryable,
            Self::SettlementPollTimeout => Terminality::Pending,
            _ => Terminality::Terminal,
        }
    }

    /// Whether the fallback loop may advance to the next candidate.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        self.terminality() == Terminality::Retryable
    }

    /// Whether the settlement lifecycle stays pending under this code.
    #[must_use]
    pub fn is_pending(self) -> bool {
        self.terminality() == Terminality::Pending
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FailureCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FailureCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| D::Error::custom(format!("unknown failure code: {s}")))
    }
}

/// Central error type: a stable code plus a human-readable reason.
///
/// The orchestrator boundary always reduces to exactly one of these; the
/// transcript holds the per-attempt detail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {reason}")]
pub struct PactError {
    pub code: FailureCode,
    pub reason: String,
}

impl PactError {
    #[must_use]
    pub fn new(code: FailureCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Internal invariant violations (I/O, serialization). These never carry
    /// domain meaning and are mapped at the orchestrator boundary.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(FailureCode::Internal, reason)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl From<std::io::Error> for PactError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for PactError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serde: {err}"))
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PactError>;
