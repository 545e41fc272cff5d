//! Hybrid logical clock stamps, the type of `created` and `updated`.
//!
//! History is ordered by `created` alone, so stamps from one clock must be
//! strictly increasing even when the wall clock stalls or steps back.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const ENCODED_LEN: usize = 12;

/// Milliseconds since the Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))?;
    u64::try_from(elapsed.as_millis())
        .map_err(|_| CoreError::InvalidData("system clock out of range".into()))
}

/// Wall milliseconds plus a tie-breaking counter. Field order makes the
/// derived ordering agree with the big-endian encoding, which is what the
/// store sorts on.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize,
)]
#[serde(into = "[u8; 12]", from = "[u8; 12]")]
pub struct Hlc {
    wall_ms: u64,
    counter: u32,
}

impl Hlc {
    pub const fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Same counter, wall time shifted forward.
    pub fn plus_millis(&self, ms: u64) -> Self {
        Self::new(self.wall_ms.saturating_add(ms), self.counter)
    }

    pub fn to_bytes(&self) -> [u8; ENCODED_LEN] {
        let mut out = [0u8; ENCODED_LEN];
        let (wall, counter) = out.split_at_mut(8);
        wall.copy_from_slice(&self.wall_ms.to_be_bytes());
        counter.copy_from_slice(&self.counter.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; ENCODED_LEN]) -> Self {
        let mut wall = [0u8; 8];
        let mut counter = [0u8; 4];
        wall.copy_from_slice(&bytes[..8]);
        counter.copy_from_slice(&bytes[8..]);
        Self::new(u64::from_be_bytes(wall), u32::from_be_bytes(counter))
    }
}

impl From<Hlc> for [u8; ENCODED_LEN] {
    fn from(stamp: Hlc) -> Self {
        stamp.to_bytes()
    }
}

impl From<[u8; ENCODED_LEN]> for Hlc {
    fn from(bytes: [u8; ENCODED_LEN]) -> Self {
        Hlc::from_bytes(&bytes)
    }
}

/// Issues strictly increasing stamps for one engine.
#[derive(Debug, Default)]
pub struct HlcClock {
    last: Hlc,
}

impl HlcClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next stamp: the wall clock when it has moved past the last stamp,
    /// otherwise the last stamp with its counter bumped.
    pub fn tick(&mut self) -> Result<Hlc, CoreError> {
        let now = physical_now()?;
        let next = if now > self.last.wall_ms {
            Hlc::new(now, 0)
        } else {
            let counter = self
                .last
                .counter
                .checked_add(1)
                .ok_or_else(|| CoreError::InvalidData("hlc counter exhausted".into()))?;
            Hlc::new(self.last.wall_ms, counter)
        };
        self.last = next;
        Ok(next)
    }

    /// Fold in a stamp written elsewhere (a stored record, another worker)
    /// so the next `tick` sorts strictly after it.
    pub fn observe(&mut self, seen: &Hlc) {
        self.last = self.last.max(*seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_strictly_increase() {
        let mut clock = HlcClock::new();
        let stamps: Vec<Hlc> = (0..200).map(|_| clock.tick().unwrap()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn stalled_wall_clock_bumps_counter() {
        let mut clock = HlcClock::new();
        let ahead = physical_now().unwrap() + 3_600_000;
        clock.observe(&Hlc::new(ahead, 4));

        assert_eq!(clock.tick().unwrap(), Hlc::new(ahead, 5));
        assert_eq!(clock.tick().unwrap(), Hlc::new(ahead, 6));
    }

    #[test]
    fn derived_order_matches_encoding() {
        let stamps = [
            Hlc::new(0, 0),
            Hlc::new(0, 9),
            Hlc::new(1_000, 0),
            Hlc::new(1_000, u32::MAX),
            Hlc::new(1_001, 0),
        ];
        for w in stamps.windows(2) {
            assert!(w[0] < w[1]);
            assert!(w[0].to_bytes() < w[1].to_bytes());
        }
        for stamp in stamps {
            assert_eq!(Hlc::from_bytes(&stamp.to_bytes()), stamp);
        }
    }

    #[test]
    fn msgpack_uses_encoded_form() {
        let stamp = Hlc::new(1_093_305_600_000, 3);
        let bytes = rmp_serde::to_vec(&stamp).unwrap();
        let back: Hlc = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, stamp);
    }

    #[test]
    fn observing_an_older_stamp_changes_nothing() {
        let mut clock = HlcClock::new();
        let first = clock.tick().unwrap();
        clock.observe(&Hlc::new(1, 0));
        assert!(clock.tick().unwrap() > first);
    }

    #[test]
    fn plus_millis_keeps_counter() {
        let stamp = Hlc::new(500, 2).plus_millis(600_000);
        assert_eq!((stamp.wall_ms(), stamp.counter()), (600_500, 2));
    }
}
