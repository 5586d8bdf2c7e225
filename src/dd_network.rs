// Simulated network delay
//
// A DelayedConnector wraps a peer so every call made through it is deferred
// on the scheduler by latency + size / bandwidth. Any peer reference handed
// over in such a call (push origin, query receiver, announced peers, ...) is
// wrapped as well before it reaches the remote side, so replies and further
// hops pay the same network cost instead of becoming instantaneous.

use std::rc::Rc;

use log::error;

use crate::dd_interface::{
    secs_f64, Chunk, Connector, ConnectorRef, DataQuery, NodeId, SimDuration,
};
use crate::dd_scheduler::EventScheduler;
use crate::dd_storage::RawStorage;

/// Latency and bandwidth of simulated links
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkProperties {
    latency: SimDuration,
    // bytes per second
    bandwidth: f64,
}

impl NetworkProperties {
    /// # Panics
    /// If `latency` is negative or `bandwidth` is not a positive finite number.
    pub fn new(latency: SimDuration, bandwidth: f64) -> Self {
        assert!(latency >= 0, "negative network latency {}", latency);
        assert!(
            bandwidth.is_finite() && bandwidth > 0.0,
            "invalid network bandwidth {}",
            bandwidth
        );
        Self { latency, bandwidth }
    }

    pub fn latency(&self) -> SimDuration {
        self.latency
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Time for a message carrying `size` bytes to arrive, saturating at `SimDuration::MAX`
    pub fn delay_for(&self, size: u64) -> SimDuration {
        self.latency
            .saturating_add(secs_f64(size as f64 / self.bandwidth))
    }
}

/// Shared context of every delay proxy created from the same origin.
pub struct DelayNetwork {
    scheduler: EventScheduler,
    properties: NetworkProperties,
}

impl DelayNetwork {
    pub fn new(scheduler: EventScheduler, properties: NetworkProperties) -> Rc<Self> {
        Rc::new(Self {
            scheduler,
            properties,
        })
    }

    pub fn properties(&self) -> &NetworkProperties {
        &self.properties
    }

    /// Wrap `peer` in a delay proxy; peers that already are one are returned as is.
    pub fn wrap(self: &Rc<Self>, peer: ConnectorRef) -> ConnectorRef {
        if peer.is_delayed() {
            return peer;
        }
        Rc::new(DelayedConnector {
            inner: peer,
            network: Rc::clone(self),
        })
    }

    fn defer<F>(&self, size: u64, call: &'static str, forward: F)
    where
        F: FnOnce() + 'static,
    {
        let delay = self.properties.delay_for(size);
        if let Err(err) = self.scheduler.schedule(delay, forward) {
            error!("dropping delayed {} call: {}", call, err);
        }
    }
}

/// A peer seen across the simulated network.
///
/// Identity is transparent (`id()` is the wrapped peer's id, answered
/// immediately); everything else arrives late.
pub struct DelayedConnector {
    inner: ConnectorRef,
    network: Rc<DelayNetwork>,
}

impl DelayedConnector {
    pub fn inner(&self) -> &ConnectorRef {
        &self.inner
    }
}

impl Connector for DelayedConnector {
    fn id(&self) -> NodeId {
        self.inner.id()
    }

    fn push(&self, chunk: Chunk, origin: ConnectorRef) {
        let size = match RawStorage::size_of(&chunk) {
            Ok(size) => size,
            Err(err) => {
                error!("dropping push of {:?} to {}: {}", chunk.key.id, self.id(), err);
                return;
            }
        };

        let inner = Rc::clone(&self.inner);
        let origin = self.network.wrap(origin);
        self.network
            .defer(size, "push", move || inner.push(chunk, origin));
    }

    fn query(&self, query: DataQuery, receiver: ConnectorRef) {
        let inner = Rc::clone(&self.inner);
        let receiver = self.network.wrap(receiver);
        self.network
            .defer(0, "query", move || inner.query(query, receiver));
    }

    fn request_connection_with(&self, peer: ConnectorRef) {
        let inner = Rc::clone(&self.inner);
        let peer = self.network.wrap(peer);
        self.network.defer(0, "request_connection_with", move || {
            inner.request_connection_with(peer)
        });
    }

    fn close_connection_with(&self, peer: ConnectorRef) {
        let inner = Rc::clone(&self.inner);
        let peer = self.network.wrap(peer);
        self.network.defer(0, "close_connection_with", move || {
            inner.close_connection_with(peer)
        });
    }

    fn request_peers(&self, receiver: ConnectorRef) {
        let inner = Rc::clone(&self.inner);
        let receiver = self.network.wrap(receiver);
        self.network
            .defer(0, "request_peers", move || inner.request_peers(receiver));
    }

    fn announce_peers(&self, peers: Vec<ConnectorRef>) {
        let inner = Rc::clone(&self.inner);
        let peers: Vec<ConnectorRef> = peers
            .into_iter()
            .map(|peer| self.network.wrap(peer))
            .collect();
        self.network
            .defer(0, "announce_peers", move || inner.announce_peers(peers));
    }

    fn is_delayed(&self) -> bool {
        true
    }
}
