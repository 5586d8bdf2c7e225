// Caching peer used by scenario runs
//
// Stores whatever is pushed to it, answers queries from storage and floods
// unanswered queries to its connections once, remembering who asked so the
// data can be relayed back when it shows up.

use dd_sim::dd_interface::{
    as_secs_f64, same_peer, secs_f64, Chunk, Connector, ConnectorRef, DataQuery, Node, NodeId,
    SimDuration, SimTime,
};
use dd_sim::dd_scheduler::EventScheduler;
use dd_sim::dd_storage::RawStorage;
use indexmap::IndexMap;
use log::{trace, warn};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub storage_capacity: u64,
    pub data_lifetime: SimDuration,
    /// A query still unanswered after this long is forwarded again
    pub forward_retry: SimDuration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            storage_capacity: 1 << 20,
            data_lifetime: secs_f64(300.0),
            forward_retry: secs_f64(5.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounters {
    pub stored: u64,
    pub evicted: u64,
    pub hits: u64,
    pub forwarded: u64,
    pub relayed: u64,
}

impl NodeCounters {
    pub fn merge(&mut self, other: &NodeCounters) {
        self.stored += other.stored;
        self.evicted += other.evicted;
        self.hits += other.hits;
        self.forwarded += other.forwarded;
        self.relayed += other.relayed;
    }
}

struct Waiting {
    forwarded_at: SimTime,
    requesters: Vec<ConnectorRef>,
}

pub struct CacheNode {
    id: NodeId,
    me: Weak<CacheNode>,
    scheduler: EventScheduler,
    settings: NodeSettings,
    online: Cell<bool>,
    storage: RefCell<RawStorage>,
    connections: RefCell<Vec<ConnectorRef>>,
    // insertion ordered, so relays happen in a reproducible order
    waiting: RefCell<IndexMap<DataQuery, Waiting>>,
    counters: Cell<NodeCounters>,
}

impl CacheNode {
    pub fn new(id: NodeId, scheduler: EventScheduler, settings: NodeSettings) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            storage: RefCell::new(RawStorage::new(
                settings.storage_capacity,
                Box::new(scheduler.clone()),
            )),
            scheduler,
            settings,
            online: Cell::new(false),
            connections: RefCell::new(Vec::new()),
            waiting: RefCell::new(IndexMap::new()),
            counters: Cell::new(NodeCounters::default()),
        })
    }

    pub fn is_online(&self) -> bool {
        self.online.get()
    }

    pub fn counters(&self) -> NodeCounters {
        self.counters.get()
    }

    #[cfg(test)]
    pub fn connection_count(&self) -> usize {
        self.connections.borrow().len()
    }

    pub fn stored_chunks(&self) -> usize {
        self.storage.borrow().len()
    }

    pub fn free_storage(&self) -> u64 {
        self.storage.borrow().free_storage()
    }

    /// Drop every peer and requester handle; linked nodes keep each other alive otherwise.
    pub fn disconnect_all(&self) {
        self.connections.borrow_mut().clear();
        self.waiting.borrow_mut().clear();
    }

    fn count(&self, update: impl FnOnce(&mut NodeCounters)) {
        let mut counters = self.counters.get();
        update(&mut counters);
        self.counters.set(counters);
    }

    fn as_connector(&self) -> Option<ConnectorRef> {
        self.me.upgrade().map(|me| me as ConnectorRef)
    }

    /// Evict expired data, then the least important, until `size` bytes fit.
    fn make_room(&self, storage: &mut RawStorage, size: u64) -> bool {
        if size > storage.capacity() {
            return false;
        }

        let expired: Vec<_> = storage
            .expired_data()
            .iter()
            .map(|record| record.chunk.key)
            .collect();
        let mut evicted = 0;
        for key in &expired {
            evicted += storage.delete(key);
        }

        while storage.free_storage() < size {
            let Some(key) = storage.least_important_data().next().map(|chunk| chunk.key) else {
                break;
            };
            evicted += storage.delete(&key);
        }

        if evicted > 0 {
            self.count(|c| c.evicted += evicted as u64);
        }
        storage.free_storage() >= size
    }

    fn store(&self, chunk: &Chunk) -> bool {
        let size = match RawStorage::size_of(chunk) {
            Ok(size) => size,
            Err(err) => {
                warn!("node {} rejects chunk {:?}: {}", self.id, chunk.key.id, err);
                return false;
            }
        };

        let now = self.scheduler.now();
        let mut storage = self.storage.borrow_mut();
        // a replaced copy gives its space back first
        storage.delete(&chunk.key);
        if !self.make_room(&mut storage, size) {
            warn!("node {} cannot fit {} bytes", self.id, size);
            return false;
        }

        let (priority, expiration) = self.freshness(now);
        match storage.store(chunk.clone(), priority, expiration) {
            Ok(()) => {
                self.count(|c| c.stored += 1);
                true
            }
            Err(err) => {
                warn!("node {} failed to store {:?}: {}", self.id, chunk.key.id, err);
                false
            }
        }
    }

    /// Requested data counts as fresh again.
    fn touch(&self, chunks: &[Chunk]) {
        let now = self.scheduler.now();
        let mut storage = self.storage.borrow_mut();
        for chunk in chunks {
            let (priority, expiration) = self.freshness(now);
            if let Err(err) = storage.re_prioritize(&chunk.key, priority, expiration) {
                warn!("node {} lost track of {:?}: {}", self.id, chunk.key.id, err);
            }
        }
    }

    // newer data is more important, so the oldest goes first
    fn freshness(&self, now: SimTime) -> (f64, SimTime) {
        let priority = as_secs_f64(now as SimDuration);
        let expiration = now.saturating_add(self.settings.data_lifetime.max(0) as SimTime);
        (priority, expiration)
    }

    fn relay(&self, chunk: &Chunk) {
        let requesters: Vec<ConnectorRef> = {
            let mut waiting = self.waiting.borrow_mut();
            let answered: Vec<DataQuery> = waiting
                .keys()
                .filter(|query| query.matches(&chunk.key))
                .copied()
                .collect();
            answered
                .iter()
                .filter_map(|query| waiting.shift_remove(query))
                .flat_map(|entry| entry.requesters)
                .collect()
        };

        let Some(me) = self.as_connector() else {
            return;
        };
        for requester in requesters {
            self.count(|c| c.relayed += 1);
            requester.push(chunk.clone(), me.clone());
        }
    }

    fn forward(&self, query: DataQuery, receiver: ConnectorRef) {
        let now = self.scheduler.now();
        let must_forward = {
            let mut waiting = self.waiting.borrow_mut();
            let entry = waiting.entry(query).or_insert_with(|| Waiting {
                forwarded_at: now,
                requesters: Vec::new(),
            });
            let fresh = entry.requesters.is_empty();
            if !entry
                .requesters
                .iter()
                .any(|r| same_peer(&**r, &*receiver))
            {
                entry.requesters.push(receiver.clone());
            }

            let stale = now.saturating_sub(entry.forwarded_at)
                >= self.settings.forward_retry.max(0) as SimTime;
            if stale {
                entry.forwarded_at = now;
            }
            fresh || stale
        };
        if !must_forward {
            return;
        }

        let Some(me) = self.as_connector() else {
            return;
        };
        let connections = self.connections.borrow().clone();
        for peer in connections.iter().filter(|p| !same_peer(&***p, &*receiver)) {
            self.count(|c| c.forwarded += 1);
            peer.query(query, me.clone());
        }
    }
}

impl Connector for CacheNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn push(&self, chunk: Chunk, _origin: ConnectorRef) {
        if !self.is_online() {
            return;
        }
        if self.store(&chunk) {
            trace!("node {} stored {:?}", self.id, chunk.key.id);
        }
        self.relay(&chunk);
    }

    fn query(&self, query: DataQuery, receiver: ConnectorRef) {
        if !self.is_online() {
            return;
        }

        let found: Vec<Chunk> = self
            .storage
            .borrow()
            .query(&query)
            .map(|record| record.chunk.clone())
            .collect();
        if found.is_empty() {
            self.forward(query, receiver);
            return;
        }

        self.count(|c| c.hits += 1);
        self.touch(&found);
        let Some(me) = self.as_connector() else {
            return;
        };
        for chunk in found {
            receiver.push(chunk, me.clone());
        }
    }

    fn request_connection_with(&self, peer: ConnectorRef) {
        if peer.id() == self.id {
            return;
        }
        let mut connections = self.connections.borrow_mut();
        if !connections.iter().any(|c| same_peer(&**c, &*peer)) {
            connections.push(peer);
        }
    }

    fn close_connection_with(&self, peer: ConnectorRef) {
        self.connections
            .borrow_mut()
            .retain(|c| !same_peer(&**c, &*peer));
    }

    fn request_peers(&self, receiver: ConnectorRef) {
        if !self.is_online() {
            return;
        }
        let peers = self.connections.borrow().clone();
        receiver.announce_peers(peers);
    }

    fn announce_peers(&self, peers: Vec<ConnectorRef>) {
        for peer in peers {
            self.request_connection_with(peer);
        }
    }
}

impl Node for CacheNode {
    fn startup(&self) {
        self.online.set(true);
    }

    fn shut_down(&self) {
        self.online.set(false);
        // nobody will be answered through this node anymore
        self.waiting.borrow_mut().clear();
    }
}
