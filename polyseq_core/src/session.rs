//! Per-connection session state for both protocol endpoints.
//!
//! A [`Responder`] waits for first contact, derives the shared table, then
//! decrypts regular messages and follows key updates until release. An
//! [`Initiator`] drives the other side of the same exchange. Every transition
//! computes its new state before committing it, so a rejected record leaves
//! the endpoint exactly as it was.

use std::borrow::Cow;
use std::fmt;

use log::{debug, info};
use thiserror::Error;

use crate::cipher::{EncryptedPayload, PolyError, calculate_psn, decrypt_bytes, encrypt};
use crate::keytable::{KeyTable, SharedParameters, check_key_count, checked_key_count};
use crate::preset::SessionPreset;
use crate::protocol::{Record, RecordKind};
use crate::rng::QSource;
use crate::transport::TransportError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstContact,
    Established,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::AwaitingFirstContact => "awaiting first contact",
            Phase::Established => "established",
            Phase::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Cipher(#[from] PolyError),

    #[error("protocol violation: {kind} while {phase}")]
    ProtocolViolation { phase: Phase, kind: RecordKind },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, SessionError::ProtocolViolation { .. })
    }
}

/// Scalars and key table of an established session.
#[derive(Debug)]
pub struct Session {
    params: SharedParameters,
    table: KeyTable,
}

impl Session {
    fn establish(params: SharedParameters) -> Result<Self, PolyError> {
        let table = KeyTable::generate(&params)?;
        Ok(Self { params, table })
    }

    pub fn params(&self) -> &SharedParameters {
        &self.params
    }

    pub fn table(&self) -> &KeyTable {
        &self.table
    }

    /// Swaps in the table for `new_s`. Nothing changes if derivation fails.
    fn rekey(&mut self, new_s: u64) -> Result<(), PolyError> {
        let params = self.params.with_salt(new_s);
        let table = KeyTable::generate(&params)?;
        self.params = params;
        self.table = table;
        Ok(())
    }
}

#[derive(Debug)]
pub enum SessionState {
    AwaitingFirstContact,
    Established(Session),
    Closed,
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        match self {
            SessionState::AwaitingFirstContact => Phase::AwaitingFirstContact,
            SessionState::Established(_) => Phase::Established,
            SessionState::Closed => Phase::Closed,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Established(session) => Some(session),
            _ => None,
        }
    }

    fn established_mut(&mut self, kind: RecordKind) -> Result<&mut Session, SessionError> {
        match self {
            SessionState::Established(session) => Ok(session),
            other => Err(SessionError::ProtocolViolation {
                phase: other.phase(),
                kind,
            }),
        }
    }

    fn violation(&self, kind: RecordKind) -> SessionError {
        SessionError::ProtocolViolation {
            phase: self.phase(),
            kind,
        }
    }
}

/// Plaintext surfaced from a regular message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub psn: u64,
    pub plaintext: Vec<u8>,
}

impl Delivered {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.plaintext)
    }
}

/// Result of a successful responder transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Record to hand back to the transport.
    Reply(Record),
    Delivered(Delivered),
    KeysUpdated { s: u64 },
    /// Session discarded; the transport should tear the connection down.
    Released,
}

/// Receiving endpoint. One instance per connection.
#[derive(Debug)]
pub struct Responder {
    state: SessionState,
    q_source: QSource,
}

impl Responder {
    pub fn new(q_source: QSource) -> Self {
        Self {
            state: SessionState::AwaitingFirstContact,
            q_source,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn session(&self) -> Option<&Session> {
        self.state.session()
    }

    /// Applies one inbound record.
    pub fn handle(&mut self, record: Record) -> Result<Outcome, SessionError> {
        let kind = record.kind();
        match record {
            Record::FirstContact { p, s, num_keys } => {
                if self.state.phase() != Phase::AwaitingFirstContact {
                    return Err(self.state.violation(kind));
                }
                let num_keys = checked_key_count(num_keys)?;
                let q = self.q_source.next_q();
                let session = Session::establish(SharedParameters::new(p, q, s, num_keys))?;
                info!("session established num_keys={num_keys} q={q}");
                self.state = SessionState::Established(session);
                Ok(Outcome::Reply(Record::FirstContactAck { q }))
            }
            Record::Regular { payload, psn } => {
                let session = self.state.established_mut(kind)?;
                let plaintext = decrypt_bytes(&payload, &session.table, psn);
                debug!("regular message psn={psn} len={}", plaintext.len());
                Ok(Outcome::Delivered(Delivered { psn, plaintext }))
            }
            Record::KeyUpdate { new_s } => {
                let session = self.state.established_mut(kind)?;
                session.rekey(new_s)?;
                info!("keys updated s={new_s}");
                Ok(Outcome::KeysUpdated { s: new_s })
            }
            Record::Release => {
                self.state.established_mut(kind)?;
                self.state = SessionState::Closed;
                info!("session released");
                Ok(Outcome::Released)
            }
            Record::FirstContactAck { .. } => Err(self.state.violation(kind)),
        }
    }

    /// Discards any session after the transport reports an abrupt close.
    pub fn destroy(&mut self) {
        if self.state.phase() != Phase::Closed {
            debug!("session destroyed while {}", self.state.phase());
        }
        self.state = SessionState::Closed;
    }
}

/// Snapshot of an initiator for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InitiatorStatus {
    pub phase: Phase,
    pub p: u64,
    pub q: Option<u64>,
    pub s: u64,
    pub key_count: usize,
    pub last_psn: Option<u64>,
}

/// Sending endpoint: opens the session, seals messages, rotates the salt and
/// releases.
#[derive(Debug)]
pub struct Initiator {
    p: u64,
    s: u64,
    num_keys: usize,
    state: SessionState,
    previous_psn: Option<u64>,
}

impl Initiator {
    pub fn new(p: u64, s: u64, num_keys: usize) -> Result<Self, PolyError> {
        check_key_count(num_keys)?;
        Ok(Self {
            p,
            s,
            num_keys,
            state: SessionState::AwaitingFirstContact,
            previous_psn: None,
        })
    }

    pub fn from_preset(preset: &SessionPreset) -> Result<Self, PolyError> {
        Self::new(preset.p, preset.s, preset.num_keys)
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn session(&self) -> Option<&Session> {
        self.state.session()
    }

    pub fn first_contact(&self) -> Result<Record, SessionError> {
        if self.state.phase() != Phase::AwaitingFirstContact {
            return Err(self.state.violation(RecordKind::FirstContact));
        }
        let num_keys = i64::try_from(self.num_keys)
            .map_err(|_| PolyError::invalid("num_keys", "does not fit a wire integer"))?;
        Ok(Record::FirstContact {
            p: self.p,
            s: self.s,
            num_keys,
        })
    }

    /// Consumes the responder's acknowledgement and derives the table.
    pub fn complete(&mut self, record: Record) -> Result<(), SessionError> {
        let q = match (&self.state, record) {
            (SessionState::AwaitingFirstContact, Record::FirstContactAck { q }) => q,
            (state, other) => return Err(state.violation(other.kind())),
        };
        let session = Session::establish(SharedParameters::new(self.p, q, self.s, self.num_keys))?;
        info!("key table ready num_keys={} q={q}", self.num_keys);
        self.state = SessionState::Established(session);
        Ok(())
    }

    /// Encrypts the next message. The PSN chains from the previous one.
    pub fn seal(&mut self, message: &[u8]) -> Result<EncryptedPayload, SessionError> {
        let previous = self.previous_psn;
        let session = self.state.established_mut(RecordKind::Regular)?;
        let psn = calculate_psn(message, previous)?;
        let payload = encrypt(message, &session.table, psn);
        self.previous_psn = Some(psn);
        debug!("sealed message psn={psn} len={}", payload.len());
        Ok(payload)
    }

    /// Regenerates the local table for `new_s` and returns the record that
    /// tells the responder to do the same.
    pub fn update_keys(&mut self, new_s: u64) -> Result<Record, SessionError> {
        let session = self.state.established_mut(RecordKind::KeyUpdate)?;
        session.rekey(new_s)?;
        self.s = new_s;
        info!("keys updated s={new_s}");
        Ok(Record::KeyUpdate { new_s })
    }

    /// Salt the classic client moves to on rekey.
    pub fn next_salt(&self) -> u64 {
        self.s.wrapping_add(1)
    }

    pub fn release(&mut self) -> Result<Record, SessionError> {
        self.state.established_mut(RecordKind::Release)?;
        self.state = SessionState::Closed;
        Ok(Record::Release)
    }

    pub fn status(&self) -> InitiatorStatus {
        let session = self.state.session();
        InitiatorStatus {
            phase: self.state.phase(),
            p: self.p,
            q: session.map(|session| session.params.q),
            s: self.s,
            key_count: session.map_or(0, |session| session.table.len()),
            last_psn: self.previous_psn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::decrypt;
    use crate::keytable::{MAX_KEYS, derive_key_table};
    use crate::preset::{PresetName, session_preset};

    fn tiny_pair() -> (Initiator, Responder) {
        let initiator = Initiator::new(17, 5, 4).unwrap();
        let responder = Responder::new(QSource::fixed(23));
        (initiator, responder)
    }

    fn handshake(initiator: &mut Initiator, responder: &mut Responder) {
        let fcm = initiator.first_contact().unwrap();
        let ack = match responder.handle(fcm).unwrap() {
            Outcome::Reply(record) => record,
            other => panic!("expected reply, got {other:?}"),
        };
        initiator.complete(ack).unwrap();
    }

    fn deliver(responder: &mut Responder, record: Record) -> Delivered {
        match responder.handle(record).unwrap() {
            Outcome::Delivered(delivered) => delivered,
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn first_contact_establishes_matching_tables() {
        let (mut initiator, mut responder) = tiny_pair();
        let fcm = initiator.first_contact().unwrap();
        assert_eq!(
            responder.handle(fcm).unwrap(),
            Outcome::Reply(Record::FirstContactAck { q: 23 })
        );
        assert_eq!(responder.phase(), Phase::Established);
        initiator.complete(Record::FirstContactAck { q: 23 }).unwrap();

        let ours = initiator.session().unwrap().table();
        let theirs = responder.session().unwrap().table();
        assert_eq!(ours, theirs);
        assert_eq!(ours.keys(), &[1631, 45823, 1017855, 22888447]);
    }

    #[test]
    fn hello_travels_end_to_end() {
        let (mut initiator, mut responder) = tiny_pair();
        handshake(&mut initiator, &mut responder);
        let payload = initiator.seal(b"HELLO").unwrap();
        assert_eq!(payload.psn, 8);
        assert_eq!(payload.bytes, vec![101, 66, 73, 73, 108]);
        let delivered = deliver(&mut responder, payload.into());
        assert_eq!(delivered.psn, 8);
        assert_eq!(delivered.text(), "HELLO");
    }

    #[test]
    fn psn_chains_across_messages() {
        let (mut initiator, mut responder) = tiny_pair();
        handshake(&mut initiator, &mut responder);
        let mut psns = Vec::new();
        for message in ["HELLO", "second message", "x"] {
            let payload = initiator.seal(message.as_bytes()).unwrap();
            psns.push(payload.psn);
            assert_eq!(deliver(&mut responder, payload.into()).text(), message);
        }
        assert_eq!(psns, vec![8, 5, 8]);
        assert_eq!(initiator.status().last_psn, Some(8));
    }

    #[test]
    fn records_before_first_contact_are_violations() {
        let mut responder = Responder::new(QSource::default());
        let records = [
            Record::Regular {
                payload: vec![1, 2, 3],
                psn: 1,
            },
            Record::KeyUpdate { new_s: 9 },
            Record::Release,
            Record::FirstContactAck { q: 1 },
        ];
        for record in records {
            let kind = record.kind();
            let err = responder.handle(record).unwrap_err();
            assert!(matches!(
                err,
                SessionError::ProtocolViolation {
                    phase: Phase::AwaitingFirstContact,
                    kind: k,
                } if k == kind
            ));
            assert_eq!(responder.phase(), Phase::AwaitingFirstContact);
        }
    }

    #[test]
    fn repeated_first_contact_is_rejected_without_touching_table() {
        let (mut initiator, mut responder) = tiny_pair();
        handshake(&mut initiator, &mut responder);
        let err = responder
            .handle(Record::FirstContact {
                p: 99,
                s: 1,
                num_keys: 8,
            })
            .unwrap_err();
        assert!(err.is_protocol_violation());
        let session = responder.session().unwrap();
        assert_eq!(session.params(), &SharedParameters::new(17, 23, 5, 4));
        assert_eq!(session.table().len(), 4);
    }

    #[test]
    fn invalid_key_count_leaves_responder_waiting() {
        let mut responder = Responder::new(QSource::fixed(23));
        for num_keys in [0, -3] {
            let err = responder
                .handle(Record::FirstContact {
                    p: 17,
                    s: 5,
                    num_keys,
                })
                .unwrap_err();
            assert!(matches!(
                err,
                SessionError::Cipher(PolyError::InvalidParameter { .. })
            ));
            assert_eq!(responder.phase(), Phase::AwaitingFirstContact);
        }
        let outcome = responder
            .handle(Record::FirstContact {
                p: 17,
                s: 5,
                num_keys: 4,
            })
            .unwrap();
        assert_eq!(outcome, Outcome::Reply(Record::FirstContactAck { q: 23 }));
    }

    #[test]
    fn oversized_key_count_leaves_responder_waiting() {
        let mut responder = Responder::new(QSource::fixed(23));
        for num_keys in [MAX_KEYS as i64 + 1, i64::MAX] {
            let err = responder
                .handle(Record::FirstContact {
                    p: 17,
                    s: 5,
                    num_keys,
                })
                .unwrap_err();
            assert!(matches!(
                err,
                SessionError::Cipher(PolyError::InvalidParameter { parameter: "num_keys", .. })
            ));
            assert_eq!(responder.phase(), Phase::AwaitingFirstContact);
            assert!(responder.session().is_none());
        }
    }

    #[test]
    fn key_update_swaps_both_tables() {
        let (mut initiator, mut responder) = tiny_pair();
        handshake(&mut initiator, &mut responder);
        let kum = initiator.update_keys(9).unwrap();
        assert_eq!(responder.handle(kum).unwrap(), Outcome::KeysUpdated { s: 9 });

        let expected = derive_key_table(17, 23, 9, 4).unwrap().0;
        assert_eq!(responder.session().unwrap().table(), &expected);
        assert_eq!(initiator.session().unwrap().table(), &expected);
        assert_eq!(responder.session().unwrap().params().s, 9);
        assert_ne!(expected, derive_key_table(17, 23, 5, 4).unwrap().0);

        let payload = initiator.seal(b"HELLO").unwrap();
        assert_eq!(deliver(&mut responder, payload.into()).text(), "HELLO");
    }

    #[test]
    fn stale_table_garbles_after_rekey() {
        let preset = session_preset(PresetName::Classic);
        let mut initiator = Initiator::from_preset(&preset).unwrap();
        let mut responder = Responder::new(QSource::fixed(preset.q));
        handshake(&mut initiator, &mut responder);
        let stale = responder.session().unwrap().table().clone();

        let new_s = initiator.next_salt();
        assert_eq!(new_s, preset.s + 1);
        let kum = initiator.update_keys(new_s).unwrap();
        responder.handle(kum).unwrap();

        let message = b"Packet sent after rekey";
        let payload = initiator.seal(message).unwrap();
        assert_ne!(decrypt(&payload, &stale), message);
        assert_eq!(deliver(&mut responder, payload.into()).plaintext, message);
    }

    #[test]
    fn release_closes_and_everything_after_is_rejected() {
        let (mut initiator, mut responder) = tiny_pair();
        handshake(&mut initiator, &mut responder);
        let lcm = initiator.release().unwrap();
        assert_eq!(responder.handle(lcm).unwrap(), Outcome::Released);
        assert_eq!(responder.phase(), Phase::Closed);
        assert!(responder.session().is_none());

        let err = responder.handle(Record::KeyUpdate { new_s: 1 }).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProtocolViolation {
                phase: Phase::Closed,
                kind: RecordKind::KeyUpdate,
            }
        ));
        let err = responder
            .handle(Record::FirstContact {
                p: 17,
                s: 5,
                num_keys: 4,
            })
            .unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(initiator.seal(b"late").unwrap_err().is_protocol_violation());
    }

    #[test]
    fn destroy_discards_session() {
        let (mut initiator, mut responder) = tiny_pair();
        handshake(&mut initiator, &mut responder);
        responder.destroy();
        assert_eq!(responder.phase(), Phase::Closed);
        assert!(responder.session().is_none());
    }

    #[test]
    fn initiator_enforces_its_own_ordering() {
        let mut initiator = Initiator::new(17, 5, 4).unwrap();
        assert!(initiator.seal(b"too early").unwrap_err().is_protocol_violation());
        assert!(initiator.update_keys(6).unwrap_err().is_protocol_violation());
        assert!(initiator.release().unwrap_err().is_protocol_violation());
        assert!(
            initiator
                .complete(Record::KeyUpdate { new_s: 1 })
                .unwrap_err()
                .is_protocol_violation()
        );

        initiator.complete(Record::FirstContactAck { q: 23 }).unwrap();
        assert!(initiator.first_contact().unwrap_err().is_protocol_violation());
        assert!(
            initiator
                .complete(Record::FirstContactAck { q: 23 })
                .unwrap_err()
                .is_protocol_violation()
        );
    }

    #[test]
    fn empty_message_keeps_previous_psn() {
        let (mut initiator, mut responder) = tiny_pair();
        handshake(&mut initiator, &mut responder);
        initiator.seal(b"HELLO").unwrap();
        let err = initiator.seal(b"").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Cipher(PolyError::InvalidParameter { parameter: "message", .. })
        ));
        assert_eq!(initiator.status().last_psn, Some(8));
    }

    #[test]
    fn status_reflects_progress() {
        let (mut initiator, mut responder) = tiny_pair();
        let before = initiator.status();
        assert_eq!(before.phase, Phase::AwaitingFirstContact);
        assert_eq!(before.q, None);
        assert_eq!(before.key_count, 0);

        handshake(&mut initiator, &mut responder);
        initiator.update_keys(initiator.next_salt()).unwrap();
        let after = initiator.status();
        assert_eq!(after.phase, Phase::Established);
        assert_eq!(after.q, Some(23));
        assert_eq!(after.s, 6);
        assert_eq!(after.key_count, 4);
    }

    #[test]
    fn zero_key_initiator_is_rejected() {
        assert!(Initiator::new(17, 5, 0).is_err());
        assert!(Initiator::new(17, 5, MAX_KEYS + 1).is_err());
    }
}
