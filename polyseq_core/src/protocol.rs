use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cipher::EncryptedPayload;

/// Logical protocol records exchanged between initiator and responder.
///
/// Serde derives are provided for collaborators; the core never picks a wire
/// format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Record {
    /// Opens a session with the initiator's scalars.
    #[serde(rename = "FCM")]
    FirstContact { p: u64, s: u64, num_keys: i64 },
    /// Echoes the responder-generated multiplier.
    #[serde(rename = "FCM_ACK")]
    FirstContactAck { q: u64 },
    #[serde(rename = "RM")]
    Regular { payload: Vec<u8>, psn: u64 },
    /// Replaces the salt; both sides regenerate their table.
    #[serde(rename = "KUM")]
    KeyUpdate { new_s: u64 },
    #[serde(rename = "LCM")]
    Release,
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::FirstContact { .. } => RecordKind::FirstContact,
            Record::FirstContactAck { .. } => RecordKind::FirstContactAck,
            Record::Regular { .. } => RecordKind::Regular,
            Record::KeyUpdate { .. } => RecordKind::KeyUpdate,
            Record::Release => RecordKind::Release,
        }
    }
}

impl From<EncryptedPayload> for Record {
    fn from(payload: EncryptedPayload) -> Self {
        Record::Regular {
            payload: payload.bytes,
            psn: payload.psn,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    FirstContact,
    FirstContactAck,
    Regular,
    KeyUpdate,
    Release,
}

impl RecordKind {
    pub fn tag(self) -> &'static str {
        match self {
            RecordKind::FirstContact => "FCM",
            RecordKind::FirstContactAck => "FCM_ACK",
            RecordKind::Regular => "RM",
            RecordKind::KeyUpdate => "KUM",
            RecordKind::Release => "LCM",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn records_carry_protocol_tags() {
        let cases = [
            (
                Record::FirstContact {
                    p: 17,
                    s: 5,
                    num_keys: 4,
                },
                json!({"kind": "FCM", "p": 17, "s": 5, "num_keys": 4}),
            ),
            (
                Record::FirstContactAck { q: 23 },
                json!({"kind": "FCM_ACK", "q": 23}),
            ),
            (
                Record::Regular {
                    payload: vec![101, 66],
                    psn: 8,
                },
                json!({"kind": "RM", "payload": [101, 66], "psn": 8}),
            ),
            (
                Record::KeyUpdate { new_s: 9 },
                json!({"kind": "KUM", "new_s": 9}),
            ),
            (Record::Release, json!({"kind": "LCM"})),
        ];
        for (record, expected) in cases {
            let value: Value = serde_json::to_value(&record).unwrap();
            assert_eq!(value, expected);
            assert_eq!(value["kind"], record.kind().tag());
            let back: Record = serde_json::from_value(value).unwrap();
            assert_eq!(back, record);
        }
    }

    #[test]
    fn payload_converts_to_regular_record() {
        let record = Record::from(EncryptedPayload::new(8, vec![1, 2, 3]));
        assert_eq!(
            record,
            Record::Regular {
                payload: vec![1, 2, 3],
                psn: 8
            }
        );
    }
}
