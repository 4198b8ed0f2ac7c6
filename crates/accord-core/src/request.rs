//! Consent requests and templates.
//!
//! A [`ConsentRequest`] is what one party sends the other before anything
//! touches the chain. Its terms are a [`ConsentTemplate`], a tagged union
//! keyed by template type. Raw terms never flow further than this module:
//! [`ConsentTemplate::validate`] turns them into [`ValidatedConsentData`],
//! which is all the rest of the crate accepts.

use accord_chain::{CoercionLevel, ConsentHashes, CreateConsentParams, UnlockMode};
use accord_crypto::EvidenceHashes;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Evidence hashes as hex strings, in any length the sender produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceHex {
    /// Voice recording hash.
    pub voice: String,
    /// Face image hash.
    pub face: String,
    /// Device public key hash.
    pub device: String,
    /// Rounded location hash.
    pub geo: String,
    /// Rounded UTC-hour hash.
    pub utc: String,
}

impl EvidenceHex {
    fn normalize(&self) -> Result<ConsentHashes> {
        ConsentHashes::from_hex(&self.voice, &self.face, &self.device, &self.geo, &self.utc)
            .map_err(|e| CoreError::Validation(e.to_string()))
    }
}

impl From<&EvidenceHashes> for EvidenceHex {
    fn from(hashes: &EvidenceHashes) -> Self {
        Self {
            voice: hashes.voice.to_hex(),
            face: hashes.face.to_hex(),
            device: hashes.device.to_hex(),
            geo: hashes.geo.to_hex(),
            utc: hashes.utc.to_hex(),
        }
    }
}

/// Template identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Unlock once.
    OneShot,
    /// Unlock for a window of time.
    Windowed,
    /// Unlock at a scheduled time.
    Scheduled,
}

impl TemplateKind {
    /// Stable identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneShot => "one_shot",
            Self::Windowed => "windowed",
            Self::Scheduled => "scheduled",
        }
    }

    /// Contract unlock mode for this template.
    pub fn unlock_mode(&self) -> UnlockMode {
        match self {
            Self::OneShot => UnlockMode::OneShot,
            Self::Windowed => UnlockMode::Windowed,
            Self::Scheduled => UnlockMode::Scheduled,
        }
    }
}

impl From<UnlockMode> for TemplateKind {
    fn from(mode: UnlockMode) -> Self {
        match mode {
            UnlockMode::OneShot => Self::OneShot,
            UnlockMode::Windowed => Self::Windowed,
            UnlockMode::Scheduled => Self::Scheduled,
        }
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terms of a consent, keyed by template type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentTemplate {
    /// Unlock once.
    OneShot {
        /// Evidence hashes.
        evidence: EvidenceHex,
        /// Self-reported coercion level, 0 to 2.
        coercion_level: u8,
    },
    /// Unlock stays valid for a window.
    Windowed {
        /// Evidence hashes.
        evidence: EvidenceHex,
        /// Self-reported coercion level, 0 to 2.
        coercion_level: u8,
        /// Window length in seconds.
        window_secs: u64,
    },
    /// Unlock becomes possible at a scheduled time.
    Scheduled {
        /// Evidence hashes.
        evidence: EvidenceHex,
        /// Self-reported coercion level, 0 to 2.
        coercion_level: u8,
        /// Unix time in seconds.
        unlock_at: u64,
    },
}

impl ConsentTemplate {
    /// Template identifier.
    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::OneShot { .. } => TemplateKind::OneShot,
            Self::Windowed { .. } => TemplateKind::Windowed,
            Self::Scheduled { .. } => TemplateKind::Scheduled,
        }
    }

    /// Check the terms for a consent with `counterparty`, created by
    /// `creator` at `now_ms`.
    pub fn validate(
        &self,
        creator: Address,
        counterparty: Address,
        counterparty_handle: Option<String>,
        now_ms: i64,
    ) -> Result<ValidatedConsentData> {
        if counterparty == Address::ZERO {
            return Err(CoreError::Validation("counterparty is the zero address".into()));
        }
        if counterparty == creator {
            return Err(CoreError::Validation(
                "a consent needs two different parties".into(),
            ));
        }

        let (evidence, level, window) = match self {
            Self::OneShot {
                evidence,
                coercion_level,
            } => (evidence, *coercion_level, U256::ZERO),
            Self::Windowed {
                evidence,
                coercion_level,
                window_secs,
            } => {
                if *window_secs == 0 {
                    return Err(CoreError::Validation("unlock window must be non-zero".into()));
                }
                (evidence, *coercion_level, U256::from(*window_secs))
            }
            Self::Scheduled {
                evidence,
                coercion_level,
                unlock_at,
            } => {
                let now_secs = u64::try_from(now_ms / 1000).unwrap_or(0);
                if *unlock_at <= now_secs {
                    return Err(CoreError::Validation(format!(
                        "scheduled unlock {unlock_at} is not in the future"
                    )));
                }
                (evidence, *coercion_level, U256::from(*unlock_at))
            }
        };

        let coercion_level =
            CoercionLevel::new(level).map_err(|e| CoreError::Validation(e.to_string()))?;

        Ok(ValidatedConsentData {
            kind: self.kind(),
            hashes: evidence.normalize()?,
            coercion_level,
            counterparty,
            counterparty_handle,
            unlock_window: window,
        })
    }
}

/// Terms that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedConsentData {
    /// Template identifier.
    pub kind: TemplateKind,
    /// Normalised evidence hashes.
    pub hashes: ConsentHashes,
    /// Coercion level.
    pub coercion_level: CoercionLevel,
    /// The other party.
    pub counterparty: Address,
    /// The other party's handle, if known.
    pub counterparty_handle: Option<String>,
    /// Unlock window or scheduled time, per template.
    pub unlock_window: U256,
}

impl ValidatedConsentData {
    /// Contract arguments for `createConsent`.
    pub fn params(&self) -> CreateConsentParams {
        CreateConsentParams {
            hashes: self.hashes,
            coercion_level: self.coercion_level,
            counterparty: self.counterparty,
            unlock_mode: self.kind.unlock_mode(),
            unlock_window: self.unlock_window,
        }
    }

    /// Rebuild from arguments decoded off the chain.
    pub fn from_params(params: &CreateConsentParams, counterparty: Address, handle: Option<String>) -> Self {
        Self {
            kind: params.unlock_mode.into(),
            hashes: params.hashes,
            coercion_level: params.coercion_level,
            counterparty,
            counterparty_handle: handle,
            unlock_window: params.unlock_window,
        }
    }
}

/// A consent proposed by another party, waiting for a local decision.
///
/// Accepting turns it into a [`Consent`](crate::Consent); rejecting drops it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRequest {
    /// Request identifier.
    pub id: String,
    /// Handle of the proposing party.
    pub from_handle: String,
    /// Wallet address of the proposing party.
    pub from_address: Address,
    /// Proposed terms.
    pub template: ConsentTemplate,
    /// Unix milliseconds when the request was made.
    pub requested_at: i64,
}

impl ConsentRequest {
    /// Validate the request as received by `recipient` at `now_ms`.
    ///
    /// The recipient becomes the creator on accept; the proposer is the
    /// counterparty.
    pub fn validate(&self, recipient: Address, now_ms: i64) -> Result<ValidatedConsentData> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation("request id is empty".into()));
        }
        if self.from_handle.trim().is_empty() {
            return Err(CoreError::Validation("request has no sender handle".into()));
        }
        self.template.validate(
            recipient,
            self.from_address,
            Some(self.from_handle.clone()),
            now_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::new([0xA1; 20]);
    const BOB: Address = Address::new([0xB2; 20]);
    const NOW: i64 = 1_717_200_000_000;

    fn evidence() -> EvidenceHex {
        EvidenceHex {
            voice: "0x01".into(),
            face: "0x02".into(),
            device: "0x03".into(),
            geo: "0x04".into(),
            utc: "0x05".into(),
        }
    }

    #[test]
    fn test_one_shot_validates() {
        let template = ConsentTemplate::OneShot {
            evidence: evidence(),
            coercion_level: 1,
        };
        let data = template.validate(ALICE, BOB, Some("bob".into()), NOW).unwrap();
        assert_eq!(data.kind, TemplateKind::OneShot);
        assert_eq!(data.unlock_window, U256::ZERO);
        assert_eq!(data.hashes.voice[31], 0x01);

        let params = data.params();
        assert_eq!(params.unlock_mode, UnlockMode::OneShot);
        assert_eq!(params.counterparty, BOB);
    }

    #[test]
    fn test_windowed_requires_window() {
        let template = ConsentTemplate::Windowed {
            evidence: evidence(),
            coercion_level: 0,
            window_secs: 0,
        };
        assert!(template.validate(ALICE, BOB, None, NOW).is_err());
    }

    #[test]
    fn test_scheduled_must_be_future() {
        let now_secs = (NOW / 1000) as u64;
        let past = ConsentTemplate::Scheduled {
            evidence: evidence(),
            coercion_level: 0,
            unlock_at: now_secs,
        };
        assert!(past.validate(ALICE, BOB, None, NOW).is_err());

        let future = ConsentTemplate::Scheduled {
            evidence: evidence(),
            coercion_level: 0,
            unlock_at: now_secs + 3_600,
        };
        let data = future.validate(ALICE, BOB, None, NOW).unwrap();
        assert_eq!(data.unlock_window, U256::from(now_secs + 3_600));
    }

    #[test]
    fn test_rejects_bad_input() {
        let template = ConsentTemplate::OneShot {
            evidence: evidence(),
            coercion_level: 3,
        };
        assert!(matches!(
            template.validate(ALICE, BOB, None, NOW),
            Err(CoreError::Validation(_))
        ));

        let template = ConsentTemplate::OneShot {
            evidence: EvidenceHex {
                voice: "zz".into(),
                ..evidence()
            },
            coercion_level: 0,
        };
        assert!(template.validate(ALICE, BOB, None, NOW).is_err());

        let template = ConsentTemplate::OneShot {
            evidence: evidence(),
            coercion_level: 0,
        };
        assert!(template.validate(ALICE, ALICE, None, NOW).is_err());
        assert!(template.validate(ALICE, Address::ZERO, None, NOW).is_err());
    }

    #[test]
    fn test_template_json_is_keyed_by_type() {
        let template = ConsentTemplate::Windowed {
            evidence: evidence(),
            coercion_level: 2,
            window_secs: 60,
        };
        let json = serde_json::to_value(&template).unwrap();
        assert!(json.get("windowed").is_some());
        assert_eq!(json["windowed"]["window_secs"], 60);

        let back: ConsentTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(back, template);
    }

    #[test]
    fn test_request_validation() {
        let request = ConsentRequest {
            id: "req-1".into(),
            from_handle: "alice".into(),
            from_address: ALICE,
            template: ConsentTemplate::OneShot {
                evidence: evidence(),
                coercion_level: 0,
            },
            requested_at: NOW,
        };
        let data = request.validate(BOB, NOW).unwrap();
        assert_eq!(data.counterparty, ALICE);
        assert_eq!(data.counterparty_handle.as_deref(), Some("alice"));

        let own = ConsentRequest {
            from_address: BOB,
            ..request.clone()
        };
        assert!(own.validate(BOB, NOW).is_err());

        let anonymous = ConsentRequest {
            from_handle: " ".into(),
            ..request
        };
        assert!(anonymous.validate(BOB, NOW).is_err());
    }

    #[test]
    fn test_evidence_hex_from_hashes() {
        let hashes = EvidenceHashes {
            voice: accord_crypto::hash(b"v"),
            face: accord_crypto::hash(b"f"),
            device: accord_crypto::hash(b"d"),
            geo: accord_crypto::hash(b"g"),
            utc: accord_crypto::hash(b"u"),
        };
        let hex = EvidenceHex::from(&hashes);
        let normalized = hex.normalize().unwrap();
        assert_eq!(normalized.voice.0, hashes.voice.to_bytes());
    }
}
