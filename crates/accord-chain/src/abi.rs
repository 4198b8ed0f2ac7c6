//! Solidity ABI encoding for the consent contract.
//!
//! Only the three contract functions, the `ConsentCreated` event and the
//! standard `Error(string)` revert payload are supported. Every argument is
//! a static type, so each call is `selector || word*`.
//!
//! ```text
//! createConsent(bytes32 voiceHash, bytes32 faceHash, bytes32 deviceHash,
//!               bytes32 geoHash, bytes32 utcHash, uint8 coercionLevel,
//!               address counterparty, uint8 unlockMode, uint256 unlockWindow)
//! requestUnlock(uint256 consentId)
//! approveUnlock(uint256 consentId)
//! event ConsentCreated(uint256 indexed consentId, address indexed party1,
//!                      address indexed party2)
//! ```

use alloy_primitives::{keccak256, Address, B256, U256};

use crate::types::{CoercionLevel, ConsentHashes, CreateConsentParams, UnlockMode};
use crate::{ChainError, Result};

/// Canonical signature of `createConsent`.
pub const CREATE_CONSENT_SIGNATURE: &str =
    "createConsent(bytes32,bytes32,bytes32,bytes32,bytes32,uint8,address,uint8,uint256)";

/// Canonical signature of `requestUnlock`.
pub const REQUEST_UNLOCK_SIGNATURE: &str = "requestUnlock(uint256)";

/// Canonical signature of `approveUnlock`.
pub const APPROVE_UNLOCK_SIGNATURE: &str = "approveUnlock(uint256)";

/// Canonical signature of the `ConsentCreated` event.
pub const CONSENT_CREATED_SIGNATURE: &str = "ConsentCreated(uint256,address,address)";

/// Selector of the standard `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// ABI word size.
pub const WORD: usize = 32;

/// Number of argument words in a `createConsent` call.
const CREATE_CONSENT_WORDS: usize = 9;

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Topic 0 of an event: `keccak256(signature)`.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// A decoded call to the consent contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    /// `createConsent(...)`.
    CreateConsent(CreateConsentParams),
    /// `requestUnlock(consentId)`.
    RequestUnlock(U256),
    /// `approveUnlock(consentId)`.
    ApproveUnlock(U256),
}

/// Normalise a hex string to exactly 32 bytes.
///
/// Accepts an optional `0x` prefix. Short inputs are left-padded with zero
/// nibbles; inputs longer than 64 digits keep their first 64 digits.
pub fn normalize_bytes32(input: &str) -> Result<B256> {
    let digits = input.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::Validation(format!(
            "not a hex string: {input:?}"
        )));
    }

    let fitted = if digits.len() >= 2 * WORD {
        digits[..2 * WORD].to_string()
    } else {
        format!("{digits:0>64}")
    };

    let bytes = hex::decode(&fitted).map_err(|e| ChainError::Validation(e.to_string()))?;
    Ok(B256::from_slice(&bytes))
}

fn word_u8(value: u8) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 1] = value;
    word
}

fn word_u256(value: U256) -> [u8; WORD] {
    value.to_be_bytes::<WORD>()
}

fn word_address(address: Address) -> [u8; WORD] {
    address.into_word().0
}

fn encode_single_u256(signature: &str, value: U256) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector(signature));
    data.extend_from_slice(&word_u256(value));
    data
}

/// Encode a `createConsent` call.
pub fn encode_create_consent(params: &CreateConsentParams) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + CREATE_CONSENT_WORDS * WORD);
    data.extend_from_slice(&selector(CREATE_CONSENT_SIGNATURE));
    for hash in params.hashes.as_array() {
        data.extend_from_slice(hash.as_slice());
    }
    data.extend_from_slice(&word_u8(params.coercion_level.value()));
    data.extend_from_slice(&word_address(params.counterparty));
    data.extend_from_slice(&word_u8(params.unlock_mode.as_u8()));
    data.extend_from_slice(&word_u256(params.unlock_window));
    data
}

/// Encode a `requestUnlock` call.
pub fn encode_request_unlock(consent_id: U256) -> Vec<u8> {
    encode_single_u256(REQUEST_UNLOCK_SIGNATURE, consent_id)
}

/// Encode an `approveUnlock` call.
pub fn encode_approve_unlock(consent_id: U256) -> Vec<u8> {
    encode_single_u256(APPROVE_UNLOCK_SIGNATURE, consent_id)
}

/// Read a `uint8` word, rejecting dirty high bytes.
fn read_u8(word: &[u8]) -> Result<u8> {
    if word[..WORD - 1].iter().any(|b| *b != 0) {
        return Err(ChainError::Abi("uint8 word has non-zero high bytes".into()));
    }
    Ok(word[WORD - 1])
}

/// Read an `address` word, rejecting dirty high bytes.
pub fn read_address(word: &[u8]) -> Result<Address> {
    if word.len() != WORD {
        return Err(ChainError::Abi(format!("address word is {} bytes", word.len())));
    }
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ChainError::Abi("address word has non-zero high bytes".into()));
    }
    Ok(Address::from_slice(&word[12..]))
}

/// Decode calldata addressed to the consent contract.
pub fn decode_call(data: &[u8]) -> Result<ContractCall> {
    if data.len() < 4 {
        return Err(ChainError::Abi("calldata shorter than a selector".into()));
    }
    let (head, args) = data.split_at(4);
    let words: Vec<&[u8]> = args.chunks(WORD).collect();
    if args.len() % WORD != 0 {
        return Err(ChainError::Abi("calldata is not word aligned".into()));
    }

    if head == selector(CREATE_CONSENT_SIGNATURE) {
        if words.len() != CREATE_CONSENT_WORDS {
            return Err(ChainError::Abi(format!(
                "createConsent expects {CREATE_CONSENT_WORDS} words, got {}",
                words.len()
            )));
        }
        let hashes = ConsentHashes {
            voice: B256::from_slice(words[0]),
            face: B256::from_slice(words[1]),
            device: B256::from_slice(words[2]),
            geo: B256::from_slice(words[3]),
            utc: B256::from_slice(words[4]),
        };
        let coercion_level = CoercionLevel::new(read_u8(words[5])?)?;
        let counterparty = read_address(words[6])?;
        let unlock_mode = UnlockMode::try_from(read_u8(words[7])?)?;
        let unlock_window = U256::from_be_slice(words[8]);
        return Ok(ContractCall::CreateConsent(CreateConsentParams {
            hashes,
            coercion_level,
            counterparty,
            unlock_mode,
            unlock_window,
        }));
    }

    let single = |name: &str| -> Result<U256> {
        match words.as_slice() {
            [id] => Ok(U256::from_be_slice(id)),
            _ => Err(ChainError::Abi(format!("{name} expects exactly one word"))),
        }
    };

    if head == selector(REQUEST_UNLOCK_SIGNATURE) {
        return Ok(ContractCall::RequestUnlock(single("requestUnlock")?));
    }
    if head == selector(APPROVE_UNLOCK_SIGNATURE) {
        return Ok(ContractCall::ApproveUnlock(single("approveUnlock")?));
    }

    Err(ChainError::Abi(format!(
        "unknown selector 0x{}",
        hex::encode(head)
    )))
}

/// Encode an `Error(string)` revert payload.
pub fn encode_revert_reason(reason: &str) -> Vec<u8> {
    let bytes = reason.as_bytes();
    let padded_len = bytes.len().div_ceil(WORD) * WORD;

    let mut data = Vec::with_capacity(4 + 2 * WORD + padded_len);
    data.extend_from_slice(&ERROR_STRING_SELECTOR);
    data.extend_from_slice(&word_u256(U256::from(WORD as u64)));
    data.extend_from_slice(&word_u256(U256::from(bytes.len() as u64)));
    data.extend_from_slice(bytes);
    data.resize(4 + 2 * WORD + padded_len, 0);
    data
}

/// Decode an `Error(string)` revert payload.
///
/// Returns `None` for empty data, custom errors and malformed payloads.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR[..])?;
    if body.len() < 2 * WORD {
        return None;
    }
    let offset = usize::try_from(U256::from_be_slice(&body[..WORD])).ok()?;
    let len_start = offset;
    let len_end = len_start.checked_add(WORD)?;
    let len = usize::try_from(U256::from_be_slice(body.get(len_start..len_end)?)).ok()?;
    let text = body.get(len_end..len_end.checked_add(len)?)?;
    String::from_utf8(text.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CreateConsentParams {
        CreateConsentParams {
            hashes: ConsentHashes {
                voice: B256::repeat_byte(0x01),
                face: B256::repeat_byte(0x02),
                device: B256::repeat_byte(0x03),
                geo: B256::repeat_byte(0x04),
                utc: B256::repeat_byte(0x05),
            },
            coercion_level: CoercionLevel::new(1).unwrap(),
            counterparty: Address::repeat_byte(0xBB),
            unlock_mode: UnlockMode::Windowed,
            unlock_window: U256::from(86_400u64),
        }
    }

    #[test]
    fn test_known_selectors() {
        // transfer(address,uint256) is the canonical sanity check
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("Error(string)"), ERROR_STRING_SELECTOR);
    }

    #[test]
    fn test_create_consent_layout() {
        let data = encode_create_consent(&params());
        assert_eq!(data.len(), 4 + 9 * WORD);
        assert_eq!(&data[..4], &selector(CREATE_CONSENT_SIGNATURE));

        // coercion level, right aligned
        assert_eq!(data[4 + 5 * WORD + 31], 1);
        // counterparty, left padded with 12 zero bytes
        assert!(data[4 + 6 * WORD..4 + 6 * WORD + 12].iter().all(|b| *b == 0));
        assert_eq!(&data[4 + 6 * WORD + 12..4 + 7 * WORD], &[0xBB; 20]);
        // unlock window 86400 = 0x015180
        assert_eq!(&data[data.len() - 3..], &[0x01, 0x51, 0x80]);
    }

    #[test]
    fn test_decode_create_consent() {
        let original = params();
        let decoded = decode_call(&encode_create_consent(&original)).unwrap();
        assert_eq!(decoded, ContractCall::CreateConsent(original));
    }

    #[test]
    fn test_unlock_calls() {
        let id = U256::from(42u64);
        let request = encode_request_unlock(id);
        assert_eq!(request.len(), 4 + WORD);
        assert_eq!(decode_call(&request).unwrap(), ContractCall::RequestUnlock(id));
        assert_eq!(
            decode_call(&encode_approve_unlock(id)).unwrap(),
            ContractCall::ApproveUnlock(id)
        );
        assert_ne!(request[..4], encode_approve_unlock(id)[..4]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_call(&[0x01, 0x02]).is_err());
        assert!(decode_call(&[0xde, 0xad, 0xbe, 0xef]).is_err());

        let mut data = encode_create_consent(&params());
        data.pop();
        assert!(decode_call(&data).is_err());

        // coercion level 3 is out of range
        let mut data = encode_create_consent(&params());
        data[4 + 5 * WORD + 31] = 3;
        assert!(decode_call(&data).is_err());
    }

    #[test]
    fn test_normalize_bytes32_pads_left() {
        let word = normalize_bytes32("0xabc").unwrap();
        assert_eq!(word[29..], [0x00, 0x0a, 0xbc][..]);
        assert!(word[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_normalize_bytes32_exact_and_long() {
        let exact = "11".repeat(32);
        assert_eq!(normalize_bytes32(&exact).unwrap(), B256::repeat_byte(0x11));

        let long = format!("0x{}{}", "22".repeat(32), "ff".repeat(4));
        assert_eq!(normalize_bytes32(&long).unwrap(), B256::repeat_byte(0x22));
    }

    #[test]
    fn test_normalize_bytes32_rejects_non_hex() {
        assert!(matches!(
            normalize_bytes32("0xnothex"),
            Err(ChainError::Validation(_))
        ));
        assert_eq!(normalize_bytes32("").unwrap(), B256::ZERO);
    }

    #[test]
    fn test_revert_reason_roundtrip() {
        let data = encode_revert_reason("Consent is still locked");
        assert_eq!(data.len(), 4 + 3 * WORD);
        assert_eq!(
            decode_revert_reason(&data).as_deref(),
            Some("Consent is still locked")
        );
    }

    #[test]
    fn test_revert_reason_malformed() {
        assert_eq!(decode_revert_reason(&[]), None);
        assert_eq!(decode_revert_reason(&[0x12, 0x34, 0x56, 0x78]), None);

        let mut data = encode_revert_reason("abc");
        data.truncate(4 + 2 * WORD + 1);
        assert_eq!(decode_revert_reason(&data), None);
    }
}
