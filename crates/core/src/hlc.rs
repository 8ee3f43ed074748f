use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// A 12-byte server timestamp: 8 bytes wall_ms (big-endian u64)
/// followed by 4 bytes counter (big-endian u32).
///
/// The store stamps audit records and mutation log rows with these so that
/// records written within the same millisecond still sort in write order.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct Hlc {
    wall_ms: u64,
    counter: u32,
}

impl Hlc {
    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.wall_ms.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let mut wall = [0u8; 8];
        let mut counter = [0u8; 4];
        wall.copy_from_slice(&bytes[..8]);
        counter.copy_from_slice(&bytes[8..]);
        Self {
            wall_ms: u64::from_be_bytes(wall),
            counter: u32::from_be_bytes(counter),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidData(format!("hlc must be 12 bytes, got {}", bytes.len())))?;
        Ok(Self::from_bytes(&arr))
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        Hlc::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// A clock that generates monotonically increasing timestamps.
pub struct HlcClock {
    wall_ms: u64,
    counter: u32,
}

impl HlcClock {
    pub fn new() -> Self {
        Self {
            wall_ms: 0,
            counter: 0,
        }
    }

    /// Generate the next monotonically increasing timestamp.
    pub fn tick(&mut self) -> Result<Hlc, CoreError> {
        let now = physical_now()?;

        let hlc = if now > self.wall_ms {
            Hlc::new(now, 0)
        } else {
            Hlc::new(self.wall_ms, self.counter + 1)
        };

        self.wall_ms = hlc.wall_ms;
        self.counter = hlc.counter;
        Ok(hlc)
    }
}

impl Default for HlcClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_monotonicity() {
        let mut clock = HlcClock::new();
        let mut prev = clock.tick().unwrap();
        for _ in 0..100 {
            let next = clock.tick().unwrap();
            assert!(next > prev, "expected {next:?} > {prev:?}");
            prev = next;
        }
    }

    #[test]
    fn same_wall_time_increments_counter() {
        let mut clock = HlcClock::new();
        let future_ms = physical_now().unwrap() + 100_000;
        clock.wall_ms = future_ms;
        clock.counter = 0;

        let t1 = clock.tick().unwrap();
        assert_eq!(t1.wall_ms(), future_ms);
        assert_eq!(t1.counter(), 1);

        let t2 = clock.tick().unwrap();
        assert_eq!(t2.counter(), 2);
    }

    #[test]
    fn ordering_matches_bytes() {
        let pairs = vec![
            (Hlc::new(100, 0), Hlc::new(200, 0)),
            (Hlc::new(100, 0), Hlc::new(100, 1)),
            (Hlc::new(100, 999), Hlc::new(101, 0)),
        ];

        for (a, b) in &pairs {
            assert_eq!(a.cmp(b), a.to_bytes().cmp(&b.to_bytes()));
            assert!(a < b, "expected {a:?} < {b:?}");
        }
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Hlc::from_slice(&[0u8; 11]).is_err());
        let hlc = Hlc::new(1_700_000_000_000, 42);
        assert_eq!(Hlc::from_slice(&hlc.to_bytes()).unwrap(), hlc);
    }
}
