use log::debug;
use serde::de::Error as DeError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::keytable::KeyTable;
use crate::sequence::FunctionSequence;

/// PSN values are the low nibble of a plaintext byte.
pub const PSN_MASK: u8 = 0x0F;
pub const ENCRYPTED_PAYLOAD_VERSION: u16 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolyError {
    #[error("invalid parameter `{parameter}`: {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },
}

impl PolyError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Ciphertext bytes together with the PSN that produced them. The PSN is not
/// secret; the receiver needs it to rebuild the chain and key offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub version: u16,
    pub psn: u64,
    pub bytes: Vec<u8>,
}

impl EncryptedPayload {
    pub fn new(psn: u64, bytes: Vec<u8>) -> Self {
        Self {
            version: ENCRYPTED_PAYLOAD_VERSION,
            psn,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Serialize for EncryptedPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EncryptedPayload", 3)?;
        state.serialize_field("version", &self.version)?;
        state.serialize_field("psn", &self.psn)?;
        state.serialize_field("bytes", &self.bytes)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for EncryptedPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            version: u16,
            psn: u64,
            bytes: Vec<u8>,
        }
        let helper = Helper::deserialize(deserializer)?;
        if helper.version != ENCRYPTED_PAYLOAD_VERSION {
            return Err(D::Error::custom(format_args!(
                "EncryptedPayload version mismatch: expected {ENCRYPTED_PAYLOAD_VERSION}, found {}",
                helper.version
            )));
        }
        Ok(Self {
            version: helper.version,
            psn: helper.psn,
            bytes: helper.bytes,
        })
    }
}

/// Encrypts `message` byte by byte: position `i` uses
/// `table[(i + psn) mod len]` and the chain selected by `psn`.
pub fn encrypt(message: &[u8], table: &KeyTable, psn: u64) -> EncryptedPayload {
    let sequence = FunctionSequence::for_psn(psn);
    let bytes: Vec<u8> = message
        .iter()
        .enumerate()
        .map(|(position, &byte)| sequence.apply(byte, table.key_for(position, psn)))
        .collect();
    debug!(
        "encrypt len={} psn={} chain={:?}",
        bytes.len(),
        psn,
        sequence.steps()
    );
    EncryptedPayload::new(psn, bytes)
}

/// Inverse of [`encrypt`]. A wrong table or PSN is not detected; it yields
/// unrelated bytes.
pub fn decrypt(payload: &EncryptedPayload, table: &KeyTable) -> Vec<u8> {
    decrypt_bytes(&payload.bytes, table, payload.psn)
}

pub fn decrypt_bytes(ciphertext: &[u8], table: &KeyTable, psn: u64) -> Vec<u8> {
    let sequence = FunctionSequence::for_psn(psn);
    ciphertext
        .iter()
        .enumerate()
        .map(|(position, &byte)| sequence.invert(byte, table.key_for(position, psn)))
        .collect()
}

/// PSN for the next outgoing message. The first message of a session uses
/// its first byte; later ones index by the previous PSN.
pub fn calculate_psn(message: &[u8], previous_psn: Option<u64>) -> Result<u64, PolyError> {
    if message.is_empty() {
        return Err(PolyError::invalid(
            "message",
            "cannot derive a sequence number from an empty message",
        ));
    }
    let index = match previous_psn {
        None => 0,
        Some(previous) => (previous % message.len() as u64) as usize,
    };
    Ok(u64::from(message[index] & PSN_MASK))
}
