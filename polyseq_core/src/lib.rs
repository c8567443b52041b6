//! Session-keyed polymorphic byte cipher and the two-party protocol that
//! drives it.
//!
//! Keys come from small reversible integer arithmetic; this crate demonstrates
//! the scheme and must **not** be used to protect anything.

pub mod cipher;
pub mod keytable;
pub mod preset;
pub mod protocol;
pub mod rng;
pub mod sequence;
pub mod session;
pub mod transform;
pub mod transport;

pub use crate::cipher::{
    ENCRYPTED_PAYLOAD_VERSION, EncryptedPayload, PSN_MASK, PolyError, calculate_psn, decrypt,
    decrypt_bytes, encrypt,
};
pub use crate::keytable::{
    KeyTable, MAX_KEYS, SharedParameters, checked_key_count, derive_key_table,
};
pub use crate::preset::{PRESETS, PresetName, SessionPreset, session_preset};
pub use crate::protocol::{Record, RecordKind};
pub use crate::rng::{DEFAULT_Q, QSource, derive_labeled_rng};
pub use crate::sequence::{FunctionSequence, sequence_indices};
pub use crate::session::{
    Delivered, Initiator, InitiatorStatus, Outcome, Phase, Responder, Session, SessionError,
    SessionState,
};
pub use crate::transform::{TRANSFORM_COUNT, Transform};
pub use crate::transport::{
    ServeEnd, ServeSummary, Transport, TransportError, TransportResult, establish, memory, serve,
};
