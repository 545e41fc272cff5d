use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Arbitrary-width bitset: `Σ (1 << bit)` over the permission groups a change
/// exercised. Stored little-endian by 64-bit word with no trailing zero words,
/// so equal masks have equal representations.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldMask {
    words: Vec<u64>,
}

impl FieldMask {
    pub fn empty() -> Self {
        Self { words: Vec::new() }
    }

    pub fn from_bits(bits: &[u32]) -> Self {
        let mut mask = Self::empty();
        for bit in bits {
            mask.set(*bit);
        }
        mask
    }

    pub fn set(&mut self, bit: u32) {
        let word = (bit / 64) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bit % 64);
    }

    pub fn contains(&self, bit: u32) -> bool {
        let word = (bit / 64) as usize;
        self.words
            .get(word)
            .is_some_and(|w| w & (1u64 << (bit % 64)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Set bits in ascending order.
    pub fn bits(&self) -> Vec<u32> {
        let mut bits = Vec::new();
        for (i, word) in self.words.iter().enumerate() {
            let mut w = *word;
            while w != 0 {
                let offset = w.trailing_zeros();
                bits.push(i as u32 * 64 + offset);
                w &= w - 1;
            }
        }
        bits
    }

    /// Lowercase hex without prefix; `"0"` for the empty mask.
    pub fn to_hex(&self) -> String {
        let Some((top, rest)) = self.words.split_last() else {
            return "0".to_string();
        };
        let mut out = format!("{top:x}");
        for word in rest.iter().rev() {
            out.push_str(&format!("{word:016x}"));
        }
        out
    }

    pub fn from_hex(hex: &str) -> Result<Self, CoreError> {
        let digits = hex.trim_start_matches("0x");
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidData(format!("invalid field mask: {hex:?}")));
        }
        let mut words = Vec::new();
        let mut end = digits.len();
        while end > 0 {
            let start = end.saturating_sub(16);
            let word = u64::from_str_radix(&digits[start..end], 16)
                .map_err(|e| CoreError::InvalidData(format!("invalid field mask: {e}")))?;
            words.push(word);
            end = start;
        }
        while words.last() == Some(&0) {
            words.pop();
        }
        Ok(Self { words })
    }
}

impl fmt::Debug for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldMask(0x{})", self.to_hex())
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl Serialize for FieldMask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldMask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex: String = Deserialize::deserialize(deserializer)?;
        FieldMask::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_summed_powers_of_two() {
        let mask = FieldMask::from_bits(&[1, 13]);
        assert_eq!(mask.to_hex(), format!("{:x}", (1u64 << 1) + (1u64 << 13)));
        assert!(mask.contains(1));
        assert!(mask.contains(13));
        assert!(!mask.contains(2));
    }

    #[test]
    fn wide_masks_span_words() {
        let mask = FieldMask::from_bits(&[0, 64, 130]);
        assert_eq!(mask.bits(), vec![0, 64, 130]);
        let hex = mask.to_hex();
        assert_eq!(FieldMask::from_hex(&hex).unwrap(), mask);
        assert_eq!(FieldMask::from_hex(&format!("0x{hex}")).unwrap(), mask);
    }

    #[test]
    fn empty_mask_is_zero() {
        let mask = FieldMask::empty();
        assert_eq!(mask.to_hex(), "0");
        assert_eq!(FieldMask::from_hex("0").unwrap(), mask);
        assert_eq!(FieldMask::from_hex("0000").unwrap(), mask);
    }

    #[test]
    fn rejects_garbage() {
        assert!(FieldMask::from_hex("").is_err());
        assert!(FieldMask::from_hex("xyz").is_err());
    }
}
