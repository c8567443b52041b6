use serde::{Deserialize, Serialize};

use crate::keytable::SharedParameters;
use crate::rng::DEFAULT_Q;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresetName {
    /// Constants used by the classic client/server pair.
    Classic,
    /// Small scalars that are easy to follow by hand.
    Tiny,
}

pub const PRESETS: &[PresetName] = &[PresetName::Classic, PresetName::Tiny];

/// Session configuration: the initiator's scalars plus the `Q` a fixed-`Q`
/// responder answers with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPreset {
    pub name: PresetName,
    pub p: u64,
    pub s: u64,
    pub num_keys: usize,
    pub q: u64,
}

pub fn session_preset(name: PresetName) -> SessionPreset {
    match name {
        PresetName::Classic => SessionPreset {
            name,
            p: 15_485_863,
            s: 123_456_789,
            num_keys: 30,
            q: DEFAULT_Q,
        },
        PresetName::Tiny => SessionPreset {
            name,
            p: 17,
            s: 5,
            num_keys: 4,
            q: 23,
        },
    }
}

impl SessionPreset {
    pub fn shared_parameters(&self) -> SharedParameters {
        SharedParameters::new(self.p, self.q, self.s, self.num_keys)
    }
}

impl Default for SessionPreset {
    fn default() -> Self {
        session_preset(PresetName::Classic)
    }
}
