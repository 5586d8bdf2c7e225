use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

// simulated time in nanoseconds since the simulation epoch
pub type SimTime = u64;
// signed, so a negative sampled delay can be detected and rejected
pub type SimDuration = i64;

pub const EPOCH: SimTime = 0;

pub const NANOS_PER_MILLI: SimDuration = 1_000_000;
pub const NANOS_PER_SEC: SimDuration = 1_000_000_000;

/// Milliseconds to a simulated duration.
#[inline]
pub const fn ms(ms: i64) -> SimDuration {
    ms * NANOS_PER_MILLI
}

/// Seconds to a simulated duration.
#[inline]
pub const fn secs(secs: i64) -> SimDuration {
    secs * NANOS_PER_SEC
}

/// Fractional seconds to a simulated duration (rounded to the nearest nanosecond).
///
/// NaN maps to 0 and infinities saturate, following `as` cast semantics.
#[inline]
pub fn secs_f64(secs: f64) -> SimDuration {
    (secs * NANOS_PER_SEC as f64).round() as SimDuration
}

/// A simulated duration in fractional seconds.
#[inline]
pub fn as_secs_f64(duration: SimDuration) -> f64 {
    duration as f64 / NANOS_PER_SEC as f64
}

// ============================================================================
// Identifiers
// ============================================================================

pub const ID_LEN: usize = 32;

/// Opaque fixed-length identifier used for nodes, users and data.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id(pub [u8; ID_LEN]);

pub type NodeId = Id;
pub type DataId = Id;

impl Id {
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

/// Source of fresh identifiers.
pub trait IdGenerator {
    fn next_id(&self) -> Id;
}

/// Deterministic id generator: `blake3(seed || counter)`.
///
/// Two generators with the same seed produce the same id sequence, which keeps
/// whole simulation runs reproducible.
pub struct HashIdGenerator {
    seed: u64,
    counter: Cell<u64>,
}

impl HashIdGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: Cell::new(0),
        }
    }
}

impl IdGenerator for HashIdGenerator {
    fn next_id(&self) -> Id {
        let n = self.counter.get();
        self.counter.set(n + 1);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&n.to_le_bytes());
        Id(*hasher.finalize().as_bytes())
    }
}

// ============================================================================
// Data keys, queries and chunks
// ============================================================================

/// Inclusive time interval `[start, end]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: SimTime,
    pub end: SimTime,
}

impl TimeRange {
    pub fn new(start: SimTime, end: SimTime) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Content identifier, optionally restricted to a time range.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub id: DataId,
    pub range: Option<TimeRange>,
}

impl DataKey {
    pub fn new(id: DataId) -> Self {
        Self { id, range: None }
    }

    pub fn ranged(id: DataId, range: TimeRange) -> Self {
        Self {
            id,
            range: Some(range),
        }
    }
}

/// Lookup predicate over data keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataQuery {
    /// Exact single-key lookup
    Key(DataKey),
    /// Any key with this id whose range overlaps `range`.
    /// Keys without a range cover all of time and always overlap.
    Range { id: DataId, range: TimeRange },
}

impl DataQuery {
    pub fn matches(&self, key: &DataKey) -> bool {
        match self {
            DataQuery::Key(k) => k == key,
            DataQuery::Range { id, range } => {
                key.id == *id && key.range.map_or(true, |r| r.overlaps(range))
            }
        }
    }

    pub fn id(&self) -> DataId {
        match self {
            DataQuery::Key(k) => k.id,
            DataQuery::Range { id, .. } => *id,
        }
    }
}

/// A unit of stored data. In simulation the payload only carries the
/// declared virtual size (see `RawStorage::create_chunk`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub key: DataKey,
    pub data: Vec<u8>,
}

// ============================================================================
// Capabilities
// ============================================================================

pub type ConnectorRef = Rc<dyn Connector>;
pub type NodeRef = Rc<dyn Node>;

/// Peer-facing capability: everything one peer may ask of another.
///
/// Peers are shared (`Rc`) and mutate through interior mutability, as every
/// call happens inside a single-threaded scheduler action.
pub trait Connector {
    fn id(&self) -> NodeId;

    fn push(&self, chunk: Chunk, origin: ConnectorRef);

    fn query(&self, query: DataQuery, receiver: ConnectorRef);

    fn request_connection_with(&self, _peer: ConnectorRef) {}

    fn close_connection_with(&self, _peer: ConnectorRef) {}

    fn request_peers(&self, _receiver: ConnectorRef) {}

    fn announce_peers(&self, _peers: Vec<ConnectorRef>) {}

    /// Type tag: `true` only for network delay proxies.
    fn is_delayed(&self) -> bool {
        false
    }
}

/// A peer node a user can be bound to.
pub trait Node: Connector {
    fn startup(&self);

    fn shut_down(&self);
}

/// Identity comparison; delay proxies are transparent here.
pub fn same_peer(a: &dyn Connector, b: &dyn Connector) -> bool {
    a.id() == b.id()
}

/// Current simulated time, independent of the scheduler API.
pub trait TimeProvider {
    fn time(&self) -> SimTime;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_id_generator_is_deterministic() {
        let a = HashIdGenerator::new(7);
        let b = HashIdGenerator::new(7);
        let c = HashIdGenerator::new(8);

        let first = a.next_id();
        assert_eq!(first, b.next_id());
        assert_ne!(first, a.next_id(), "counter must advance");
        assert_ne!(first, c.next_id(), "seed must matter");
    }

    #[test]
    fn test_exact_query_matches_only_same_key() {
        let id = Id([1; ID_LEN]);
        let key = DataKey::new(id);
        let other = DataKey::new(Id([2; ID_LEN]));

        assert!(DataQuery::Key(key).matches(&key));
        assert!(!DataQuery::Key(key).matches(&other));
        assert!(!DataQuery::Key(key).matches(&DataKey::ranged(id, TimeRange::new(0, 10))));
    }

    #[test]
    fn test_range_query_overlap() {
        let id = Id([3; ID_LEN]);
        let query = DataQuery::Range {
            id,
            range: TimeRange::new(10, 20),
        };

        assert!(query.matches(&DataKey::ranged(id, TimeRange::new(0, 10))));
        assert!(query.matches(&DataKey::ranged(id, TimeRange::new(15, 30))));
        assert!(!query.matches(&DataKey::ranged(id, TimeRange::new(21, 30))));
        assert!(query.matches(&DataKey::new(id)));
        assert!(!query.matches(&DataKey::new(Id([4; ID_LEN]))));
    }

    #[test]
    fn test_time_helpers() {
        assert_eq!(ms(3), 3_000_000);
        assert_eq!(secs(2), 2_000_000_000);
        assert_eq!(secs_f64(0.5), 500_000_000);
        assert!((as_secs_f64(ms(250)) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_id_display_is_short_hex() {
        let mut bytes = [0u8; ID_LEN];
        bytes[0] = 0xab;
        bytes[3] = 0x01;
        assert_eq!(Id(bytes).to_string(), "ab000001");
    }
}
