//! Record transport seam and the loops that drive a session over it.
//!
//! The core never frames or serializes records; a [`Transport`] hands over
//! whole [`Record`]s. [`memory::pair`] connects two endpoints in-process.

use log::{debug, info, warn};
use thiserror::Error;

use crate::protocol::Record;
use crate::session::{Delivered, Initiator, Outcome, Responder, SessionError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer went away; for a responder this destroys the session.
    #[error("connection closed")]
    Disconnected,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Moves whole records between the two endpoints.
pub trait Transport {
    fn send(&mut self, record: &Record) -> TransportResult<()>;

    /// Blocks until the next record arrives.
    fn receive(&mut self) -> TransportResult<Record>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, record: &Record) -> TransportResult<()> {
        (**self).send(record)
    }

    fn receive(&mut self) -> TransportResult<Record> {
        (**self).receive()
    }
}

/// In-process transport over channels.
pub mod memory {
    use std::sync::mpsc::{Receiver, Sender, channel};

    use super::{Transport, TransportError, TransportResult};
    use crate::protocol::Record;

    pub struct MemoryTransport {
        tx: Sender<Record>,
        rx: Receiver<Record>,
    }

    /// Two connected endpoints. Dropping one makes the other's `receive`
    /// report [`TransportError::Disconnected`].
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let (tx_a, rx_b) = channel();
        let (tx_b, rx_a) = channel();
        (
            MemoryTransport { tx: tx_a, rx: rx_a },
            MemoryTransport { tx: tx_b, rx: rx_b },
        )
    }

    impl Transport for MemoryTransport {
        fn send(&mut self, record: &Record) -> TransportResult<()> {
            self.tx
                .send(record.clone())
                .map_err(|_| TransportError::Disconnected)
        }

        fn receive(&mut self) -> TransportResult<Record> {
            self.rx.recv().map_err(|_| TransportError::Disconnected)
        }
    }
}

/// How a [`serve`] loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeEnd {
    Released,
    Disconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServeSummary {
    pub end: ServeEnd,
    pub delivered: usize,
    pub key_updates: usize,
    pub violations: usize,
}

/// Runs `responder` until the peer releases the session or the transport
/// closes. Every delivered message is passed to `on_message`.
///
/// Rejected records are logged and counted and the loop keeps listening. A
/// peer that disappears before a reply reaches it is reported as an error;
/// the session is destroyed either way.
pub fn serve<T, F>(
    responder: &mut Responder,
    mut transport: T,
    mut on_message: F,
) -> Result<ServeSummary, SessionError>
where
    T: Transport,
    F: FnMut(&Delivered),
{
    let mut summary = ServeSummary {
        end: ServeEnd::Disconnected,
        delivered: 0,
        key_updates: 0,
        violations: 0,
    };
    loop {
        let record = match transport.receive() {
            Ok(record) => record,
            Err(TransportError::Disconnected) => {
                info!("peer disconnected");
                responder.destroy();
                return Ok(summary);
            }
        };
        debug!("received {}", record.kind());
        match responder.handle(record) {
            Ok(Outcome::Reply(reply)) => {
                if let Err(err) = transport.send(&reply) {
                    warn!("could not deliver {}: {err}", reply.kind());
                    responder.destroy();
                    return Err(err.into());
                }
            }
            Ok(Outcome::Delivered(delivered)) => {
                summary.delivered += 1;
                on_message(&delivered);
            }
            Ok(Outcome::KeysUpdated { .. }) => summary.key_updates += 1,
            Ok(Outcome::Released) => {
                summary.end = ServeEnd::Released;
                return Ok(summary);
            }
            Err(err) => {
                summary.violations += 1;
                warn!("rejected record: {err}");
            }
        }
    }
}

/// Sends first contact and waits for the acknowledgement.
pub fn establish<T: Transport>(
    initiator: &mut Initiator,
    mut transport: T,
) -> Result<(), SessionError> {
    let fcm = initiator.first_contact()?;
    transport.send(&fcm)?;
    let ack = transport.receive()?;
    initiator.complete(ack)
}
