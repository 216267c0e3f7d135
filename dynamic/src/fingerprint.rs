//! Structural fingerprints of configuration snapshots.
//!
//! A fingerprint is only ever compared for equality. It is the SHA-256 digest
//! of the canonical JSON encoding of a [`Configuration`]; every map in the
//! model is ordered, so two snapshots with the same content hash the same no
//! matter in which order their entries were inserted.

use crate::config::Configuration;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum FingerprintError {
    #[error("could not encode configuration: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

pub fn fingerprint(configuration: &Configuration) -> Result<Fingerprint, FingerprintError> {
    let encoded = serde_json::to_vec(configuration)?;
    let digest = Sha256::digest(&encoded);

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Ok(Fingerprint(bytes))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    Changed,
    Unchanged,
}

/// Remembers the fingerprint of the last published snapshot of one provider.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<Fingerprint>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `configuration` with the last observed snapshot and records it.
    ///
    /// A snapshot that cannot be fingerprinted is reported as changed, so a
    /// real update is never suppressed.
    pub fn observe(&mut self, configuration: &Configuration) -> Change {
        self.record(fingerprint(configuration))
    }

    fn record(&mut self, result: Result<Fingerprint, FingerprintError>) -> Change {
        match result {
            Ok(current) if self.last == Some(current) => Change::Unchanged,
            Ok(current) => {
                self.last = Some(current);
                Change::Changed
            }
            Err(err) => {
                tracing::error!(error = %err, "Unable to hash the configuration, publishing it anyway");
                self.last = None;
                Change::Changed
            }
        }
    }
}
