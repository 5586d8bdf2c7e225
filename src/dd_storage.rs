// Per-node raw data storage
//
// Bounded capacity store with priority and expiry based eviction support.
// Priorities are assigned by whatever strategy sits above this layer; the
// storage only keeps records sorted (lowest priority first) and exposes
// which records have expired against the simulated clock.

use log::trace;

use crate::dd_interface::{Chunk, DataKey, DataQuery, SimTime, TimeProvider};

/// Length of the virtual size payload carried by simulated chunks
pub const SIZE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("malformed size payload: expected 8 bytes, got {len}")]
    MalformedSize { len: usize },

    #[error("no record stored under {key:?}")]
    NotFound { key: DataKey },
}

/// A stored chunk with its eviction metadata
#[derive(Clone, Debug, PartialEq)]
pub struct DataRecord {
    pub chunk: Chunk,
    pub priority: f64,
    pub priority_expiration: SimTime,
    size: u64,
}

impl DataRecord {
    /// Decoded virtual size of the chunk
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// In-memory storage for a single simulated node
///
/// # Capacity
/// `store()` charges the chunk's virtual size against the free capacity
/// without checking it. Callers must consult `free_storage()` (and evict via
/// `least_important_data()` / `expired_data()`) before storing; exceeding the
/// capacity is a caller bug and trips a debug assertion.
///
/// # Performance Characteristics
/// - Store / RePrioritize: O(n) (sorted insert)
/// - Delete / Query: O(n) scan
/// - Least important iteration: O(1) per item
///
/// # Example
/// ```rust
/// use dd_sim::dd_storage::RawStorage;
/// use dd_sim::dd_scheduler::EventScheduler;
/// use dd_sim::dd_interface::{DataKey, HashIdGenerator, IdGenerator};
///
/// let ids = HashIdGenerator::new(1);
/// let mut storage = RawStorage::new(1000, Box::new(EventScheduler::new()));
///
/// let chunk = RawStorage::create_chunk(DataKey::new(ids.next_id()), 12);
/// storage.store(chunk, 1.0, 0).unwrap();
/// assert_eq!(storage.free_storage(), 988);
/// ```
pub struct RawStorage {
    // ascending priority; ties keep store order
    records: Vec<DataRecord>,
    capacity: u64,
    free: u64,
    clock: Box<dyn TimeProvider>,
}

impl RawStorage {
    pub fn new(capacity: u64, clock: Box<dyn TimeProvider>) -> Self {
        Self {
            records: Vec::new(),
            capacity,
            free: capacity,
            clock,
        }
    }

    /// Create a chunk whose payload only declares `virtual_size`.
    pub fn create_chunk(key: DataKey, virtual_size: u64) -> Chunk {
        Chunk {
            key,
            data: virtual_size.to_le_bytes().to_vec(),
        }
    }

    /// Decode the declared virtual size of a chunk.
    pub fn size_of(chunk: &Chunk) -> Result<u64, StorageError> {
        let bytes: [u8; SIZE_LEN] = chunk
            .data
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::MalformedSize {
                len: chunk.data.len(),
            })?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Store a chunk, replacing any record under the same key.
    ///
    /// # Errors
    /// `StorageError::MalformedSize` if the payload does not decode; the
    /// storage is left untouched.
    pub fn store(
        &mut self,
        chunk: Chunk,
        priority: f64,
        expiration: SimTime,
    ) -> Result<(), StorageError> {
        let size = Self::size_of(&chunk)?;
        self.delete(&chunk.key);

        debug_assert!(
            size <= self.free,
            "storing {} bytes with only {} free",
            size,
            self.free
        );
        self.free -= size;

        let pos = self.records.partition_point(|r| r.priority <= priority);
        trace!(
            "store {:?} size:{} priority:{} at {}",
            chunk.key.id,
            size,
            priority,
            pos
        );
        self.records.insert(
            pos,
            DataRecord {
                chunk,
                priority,
                priority_expiration: expiration,
                size,
            },
        );
        Ok(())
    }

    /// Remove every record stored under `key`, returning how many were removed.
    pub fn delete(&mut self, key: &DataKey) -> usize {
        let before = self.records.len();
        let mut reclaimed = 0;
        self.records.retain(|r| {
            if r.chunk.key == *key {
                reclaimed += r.size;
                false
            } else {
                true
            }
        });
        self.free += reclaimed;
        before - self.records.len()
    }

    /// All records whose key matches `query`, in ascending priority.
    pub fn query<'a>(&'a self, query: &DataQuery) -> impl Iterator<Item = &'a DataRecord> + 'a {
        let query = *query;
        self.records
            .iter()
            .filter(move |r| query.matches(&r.chunk.key))
    }

    /// Eviction candidates, least important first.
    ///
    /// Lazy; every call starts again from the lowest priority.
    pub fn least_important_data(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.records.iter().map(|r| &r.chunk)
    }

    /// Records whose priority expiration is not after the current time.
    pub fn expired_data(&self) -> Vec<&DataRecord> {
        let now = self.clock.time();
        self.records
            .iter()
            .filter(|r| r.priority_expiration <= now)
            .collect()
    }

    /// Re-insert the record under `key` with a new priority and expiration.
    ///
    /// # Errors
    /// `StorageError::NotFound` if nothing is stored under `key`.
    pub fn re_prioritize(
        &mut self,
        key: &DataKey,
        priority: f64,
        expiration: SimTime,
    ) -> Result<(), StorageError> {
        let pos = self
            .records
            .iter()
            .position(|r| r.chunk.key == *key)
            .ok_or(StorageError::NotFound { key: *key })?;

        let record = self.records.remove(pos);
        self.free += record.size;
        self.store(record.chunk, priority, expiration)
    }

    pub fn contains(&self, key: &DataKey) -> bool {
        self.records.iter().any(|r| r.chunk.key == *key)
    }

    pub fn free_storage(&self) -> u64 {
        self.free
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
