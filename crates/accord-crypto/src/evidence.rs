//! Attestation evidence hashing.
//!
//! A consent is anchored by five content hashes. Raw captures never leave
//! the device; only their digests are committed on-chain. Location and time
//! are coarsened before hashing so the digest cannot be brute-forced back to
//! a precise position or instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{hash, Hash256};
use crate::{CryptoError, Result};

/// Decimal places kept for latitude/longitude (~1.1 km at the equator).
pub const GEO_DECIMALS: usize = 2;

/// Coarsen a coordinate pair to the form that gets hashed.
///
/// # Errors
///
/// Rejects non-finite values and coordinates outside the valid ranges.
pub fn round_geo(latitude: f64, longitude: f64) -> Result<String> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(CryptoError::InvalidEvidence(format!(
            "latitude out of range: {latitude}"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(CryptoError::InvalidEvidence(format!(
            "longitude out of range: {longitude}"
        )));
    }
    // Normalise -0.00 so both hemispheres of zero hash identically
    let lat = format!("{:.*}", GEO_DECIMALS, latitude).replace("-0.00", "0.00");
    let lon = format!("{:.*}", GEO_DECIMALS, longitude).replace("-0.00", "0.00");
    Ok(format!("{lat},{lon}"))
}

/// Truncate an instant to its UTC hour, e.g. `2024-05-01T13:00Z`.
pub fn round_utc_hour(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:00Z").to_string()
}

/// Raw capture buffers handed over by the capture UI.
#[derive(Clone, Debug)]
pub struct EvidenceCapture {
    /// Recorded voice statement.
    pub voice: Vec<u8>,
    /// Captured face image.
    pub face: Vec<u8>,
    /// The capturing device's public key.
    pub device_public_key: Vec<u8>,
    /// Latitude at capture time.
    pub latitude: f64,
    /// Longitude at capture time.
    pub longitude: f64,
    /// Capture instant.
    pub captured_at: DateTime<Utc>,
}

/// The five 32-byte digests committed with a consent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceHashes {
    /// Hash of the voice recording.
    pub voice: Hash256,
    /// Hash of the face image.
    pub face: Hash256,
    /// Hash of the device public key.
    pub device: Hash256,
    /// Hash of the rounded location string.
    pub geo: Hash256,
    /// Hash of the rounded UTC-hour string.
    pub utc: Hash256,
}

impl EvidenceHashes {
    /// Hash every capture buffer with the same function.
    pub fn from_capture(capture: &EvidenceCapture) -> Result<Self> {
        if capture.voice.is_empty() {
            return Err(CryptoError::InvalidEvidence("voice capture is empty".into()));
        }
        if capture.face.is_empty() {
            return Err(CryptoError::InvalidEvidence("face capture is empty".into()));
        }
        if capture.device_public_key.is_empty() {
            return Err(CryptoError::InvalidEvidence(
                "device public key is empty".into(),
            ));
        }

        let geo = round_geo(capture.latitude, capture.longitude)?;
        let utc = round_utc_hour(capture.captured_at);

        Ok(Self {
            voice: hash(&capture.voice),
            face: hash(&capture.face),
            device: hash(&capture.device_public_key),
            geo: hash(geo.as_bytes()),
            utc: hash(utc.as_bytes()),
        })
    }

    /// The hashes in contract argument order: voice, face, device, geo, utc.
    pub fn as_array(&self) -> [Hash256; 5] {
        [self.voice, self.face, self.device, self.geo, self.utc]
    }
}
