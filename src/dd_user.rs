// Simulated user
//
// A user is bound to one node and cycles Offline -> Starting -> Online ->
// Stopping -> Offline forever. Every transition is a scheduler event, so the
// cycle never grows the call stack. While online the user's activity drives
// uploads and queries; the user tracks the queries it is waiting on and
// samples each one exactly once: success on a matching push, failure on
// timeout or on going offline.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, error, trace};

use crate::dd_activity::Activity;
use crate::dd_interface::{
    as_secs_f64, Chunk, Connector, ConnectorRef, DataQuery, NodeId, NodeRef, SimDuration,
    SimTime,
};
use crate::dd_random::{DurationSampler, Intner};
use crate::dd_samples::UserStats;
use crate::dd_scheduler::{EventScheduler, ScheduleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserPhase {
    Offline,
    /// startup scheduled
    Starting,
    Online,
    /// shutdown in progress
    Stopping,
}

/// Pluggable parts of a user's behavior.
pub struct UserBehavior {
    pub startup: Box<dyn DurationSampler>,
    pub online: Box<dyn DurationSampler>,
    pub activity: Rc<dyn Activity>,
    /// Picks which attractive query is issued next
    pub selector: Box<dyn Intner>,
    pub query_timeout: SimDuration,
}

#[derive(Debug, Clone, Copy)]
struct PendingQuery {
    arrived_at: SimTime,
    // changes whenever the query is re-issued, so stale timeout checks are ignored
    ticket: u64,
}

struct UserState {
    phase: UserPhase,
    pending: IndexMap<DataQuery, PendingQuery>,
    attractive: Vec<DataQuery>,
    next_ticket: u64,
}

pub struct User {
    id: NodeId,
    node: NodeRef,
    scheduler: EventScheduler,
    startup: Box<dyn DurationSampler>,
    online: Box<dyn DurationSampler>,
    activity: Rc<dyn Activity>,
    selector: Box<dyn Intner>,
    query_timeout: SimDuration,
    stats: UserStats,
    state: RefCell<UserState>,
}

impl User {
    /// # Panics
    /// If `behavior.query_timeout` is negative.
    pub fn new(
        id: NodeId,
        node: NodeRef,
        scheduler: EventScheduler,
        behavior: UserBehavior,
        stats: UserStats,
    ) -> Rc<Self> {
        assert!(
            behavior.query_timeout >= 0,
            "negative query timeout {}",
            behavior.query_timeout
        );

        Rc::new(Self {
            id,
            node,
            scheduler,
            startup: behavior.startup,
            online: behavior.online,
            activity: behavior.activity,
            selector: behavior.selector,
            query_timeout: behavior.query_timeout,
            stats,
            state: RefCell::new(UserState {
                phase: UserPhase::Offline,
                pending: IndexMap::new(),
                attractive: Vec::new(),
                next_ticket: 0,
            }),
        })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn scheduler(&self) -> &EventScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &UserStats {
        &self.stats
    }

    pub fn phase(&self) -> UserPhase {
        self.state.borrow().phase
    }

    /// Queries issued and not yet answered, oldest first
    pub fn pending_queries(&self) -> Vec<DataQuery> {
        self.state.borrow().pending.keys().copied().collect()
    }

    pub fn attractive_queries(&self) -> Vec<DataQuery> {
        self.state.borrow().attractive.clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Schedule the next startup after a sampled startup duration.
    pub fn activate(self: &Rc<Self>) -> Result<(), ScheduleError> {
        self.state.borrow_mut().phase = UserPhase::Starting;

        let delay = self.startup.next_sample();
        let user = Rc::downgrade(self);
        self.scheduler.schedule(delay, move || {
            if let Some(user) = user.upgrade() {
                user.do_startup();
            }
        })
    }

    fn do_startup(self: &Rc<Self>) {
        self.node.startup();
        self.state.borrow_mut().phase = UserPhase::Online;

        let online_for = self.online.next_sample();
        if online_for < 0 {
            error!("user {} sampled negative online duration {}", self.id, online_for);
            return;
        }
        let next_offline = self.scheduler.now().saturating_add(online_for as SimTime);
        debug!("user {} online until {}ns", self.id, next_offline);

        if let Err(err) = Rc::clone(&self.activity).schedule_until(Rc::clone(self), next_offline) {
            error!("user {} activity not scheduled: {}", self.id, err);
        }

        let user = Rc::downgrade(self);
        let scheduled = self.scheduler.schedule_absolute(next_offline, move || {
            if let Some(user) = user.upgrade() {
                user.do_shut_down();
            }
        });
        if let Err(err) = scheduled {
            error!("user {} shutdown not scheduled: {}", self.id, err);
        }
    }

    fn do_shut_down(self: &Rc<Self>) {
        self.state.borrow_mut().phase = UserPhase::Stopping;
        self.node.shut_down();

        // going offline forfeits every outstanding query
        let abandoned = {
            let mut state = self.state.borrow_mut();
            let abandoned = state.pending.len();
            state.pending.clear();
            abandoned
        };
        for _ in 0..abandoned {
            self.stats.record_failure();
        }
        debug!("user {} offline, {} queries abandoned", self.id, abandoned);

        self.state.borrow_mut().phase = UserPhase::Offline;
        if let Err(err) = self.activate() {
            error!("user {} not reactivated: {}", self.id, err);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn attract_to(&self, query: DataQuery) {
        self.state.borrow_mut().attractive.push(query);
    }

    /// Move a randomly selected attractive query into the pending set.
    ///
    /// Re-issuing a query that is already pending restarts its timeout clock.
    /// The query fails once its age exceeds `query_timeout`; data arriving
    /// exactly at the timeout still counts.
    pub fn pop_attractive_query(self: &Rc<Self>) -> Option<DataQuery> {
        let (query, ticket) = {
            let mut state = self.state.borrow_mut();
            if state.attractive.is_empty() {
                return None;
            }

            let index = self.selector.intn(state.attractive.len());
            let query = state.attractive.remove(index);
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.pending.insert(
                query,
                PendingQuery {
                    arrived_at: self.scheduler.now(),
                    ticket,
                },
            );
            (query, ticket)
        };

        let user = Rc::downgrade(self);
        let check_after = self.query_timeout.saturating_add(1);
        let scheduled = self.scheduler.schedule(check_after, move || {
            if let Some(user) = user.upgrade() {
                user.check_timeout(&query, ticket);
            }
        });
        if let Err(err) = scheduled {
            error!("user {} timeout check not scheduled: {}", self.id, err);
        }

        Some(query)
    }

    fn check_timeout(&self, query: &DataQuery, ticket: u64) {
        let timed_out = {
            let mut state = self.state.borrow_mut();
            match state.pending.get(query) {
                Some(pending) if pending.ticket == ticket => {
                    state.pending.shift_remove(query);
                    true
                }
                _ => false,
            }
        };

        if timed_out {
            trace!("user {} query {:?} timed out", self.id, query.id());
            self.stats.record_failure();
        }
    }

    /// Fail every pending query older than `query_timeout`.
    ///
    /// Returns the number of queries failed.
    pub fn sweep_timeouts(&self) -> usize {
        let now = self.scheduler.now();
        let timeout = self.query_timeout as SimTime;

        let failed = {
            let mut state = self.state.borrow_mut();
            let before = state.pending.len();
            state
                .pending
                .retain(|_, pending| now.saturating_sub(pending.arrived_at) <= timeout);
            before - state.pending.len()
        };

        for _ in 0..failed {
            self.stats.record_failure();
        }
        failed
    }
}

impl Connector for User {
    fn id(&self) -> NodeId {
        self.id
    }

    fn push(&self, chunk: Chunk, _origin: ConnectorRef) {
        let arrived_at = {
            let mut state = self.state.borrow_mut();
            let Some(index) = state.pending.keys().position(|q| q.matches(&chunk.key)) else {
                return;
            };
            state
                .pending
                .shift_remove_index(index)
                .map(|(_, pending)| pending.arrived_at)
        };

        if let Some(arrived_at) = arrived_at {
            let waited = self.scheduler.now().saturating_sub(arrived_at);
            self.stats
                .record_success(as_secs_f64(waited as SimDuration));
        }
    }

    // users only consume data
    fn query(&self, _query: DataQuery, _receiver: ConnectorRef) {}
}
