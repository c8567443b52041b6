use serde::{Deserialize, Serialize};

/// Number of transforms the cipher chains per byte.
pub const TRANSFORM_COUNT: usize = 3;

/// Reversible byte transforms keyed by a 64-bit table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transform {
    Xor,
    Rotate,
    Substitute,
}

impl Transform {
    pub const ALL: [Transform; TRANSFORM_COUNT] =
        [Transform::Xor, Transform::Rotate, Transform::Substitute];

    /// Transform at position `index` of [`Transform::ALL`].
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn encode(self, data: u8, key: u64) -> u8 {
        match self {
            Transform::Xor => data ^ key_byte(key),
            Transform::Rotate => data.rotate_left(rotation(key)),
            Transform::Substitute => data.wrapping_add(key_byte(key)),
        }
    }

    #[inline]
    pub fn decode(self, data: u8, key: u64) -> u8 {
        match self {
            Transform::Xor => data ^ key_byte(key),
            Transform::Rotate => data.rotate_right(rotation(key)),
            Transform::Substitute => data.wrapping_sub(key_byte(key)),
        }
    }
}

/// `key mod 256`
#[inline]
fn key_byte(key: u64) -> u8 {
    (key & 0xFF) as u8
}

/// `key mod 8`
#[inline]
fn rotation(key: u64) -> u32 {
    (key % 8) as u32
}

/// Explicit 256-entry substitution box, slot `i` holding `(i + key) mod 256`.
pub fn substitution_table(key: u64) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (slot, entry) in table.iter_mut().enumerate() {
        *entry = (slot as u8).wrapping_add(key_byte(key));
    }
    table
}

/// Positional inverse of [`substitution_table`] by search. Reference only;
/// [`Transform::decode`] computes the same value directly.
pub fn substitution_inverse_by_search(data: u8, key: u64) -> u8 {
    let table = substitution_table(key);
    table
        .iter()
        .position(|&entry| entry == data)
        .map(|slot| slot as u8)
        .unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEYS: [u64; 8] = [0, 1, 7, 8, 255, 256, 0xDEAD_BEEF, u64::MAX];

    #[test]
    fn every_transform_round_trips_every_byte() {
        for transform in Transform::ALL {
            for key in SAMPLE_KEYS {
                for byte in 0..=u8::MAX {
                    let encoded = transform.encode(byte, key);
                    assert_eq!(
                        transform.decode(encoded, key),
                        byte,
                        "{transform:?} failed for byte {byte} key {key}"
                    );
                }
            }
        }
    }

    #[test]
    fn xor_only_uses_low_key_byte() {
        assert_eq!(Transform::Xor.encode(0x41, 0x1_00), 0x41);
        assert_eq!(Transform::Xor.encode(0x41, 0xFF), 0xBE);
        assert_eq!(Transform::Xor.encode(0x41, 0x41), 0);
    }

    #[test]
    fn rotate_by_multiple_of_eight_is_identity() {
        assert_eq!(Transform::Rotate.encode(0b1000_0001, 8), 0b1000_0001);
        assert_eq!(Transform::Rotate.encode(0b1000_0001, 1), 0b0000_0011);
        assert_eq!(Transform::Rotate.encode(0b1000_0001, u64::MAX), 0b1100_0000);
    }

    #[test]
    fn substitution_matches_table_and_search_inverse() {
        for key in SAMPLE_KEYS {
            let table = substitution_table(key);
            for byte in 0..=u8::MAX {
                let encoded = Transform::Substitute.encode(byte, key);
                assert_eq!(encoded, table[byte as usize]);
                assert_eq!(
                    substitution_inverse_by_search(encoded, key),
                    Transform::Substitute.decode(encoded, key)
                );
            }
        }
    }

    #[test]
    fn substitution_table_covers_top_of_key_range() {
        for key in [u64::MAX - 255, u64::MAX - 1, u64::MAX] {
            let table = substitution_table(key);
            assert_eq!(table[0], key_byte(key));
            assert_eq!(table[255], key_byte(key).wrapping_sub(1));
        }
        let table = substitution_table(u64::MAX);
        assert_eq!(&table[..3], &[0xFF, 0x00, 0x01]);
    }

    #[test]
    fn index_mapping_is_stable() {
        assert_eq!(Transform::from_index(0), Some(Transform::Xor));
        assert_eq!(Transform::from_index(1), Some(Transform::Rotate));
        assert_eq!(Transform::from_index(2), Some(Transform::Substitute));
        assert_eq!(Transform::from_index(TRANSFORM_COUNT), None);
    }
}
