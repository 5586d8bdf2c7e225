// User activities
//
// An activity is a behavioral policy: given a user that just came online and
// the time it will go offline, it plans the user's actions on the scheduler.
// Every action is planned strictly before the horizon, so nothing an
// activity does can happen while the user is offline.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{trace, warn};

use crate::dd_interface::{Connector, ConnectorRef, DataKey, DataQuery, IdGenerator, SimTime};
use crate::dd_random::{DurationSampler, Float64Sampler, Permutator};
use crate::dd_scheduler::{EventScheduler, ScheduleError};
use crate::dd_storage::RawStorage;
use crate::dd_user::User;

pub trait Activity {
    /// Plan this activity's actions for `user` in `[now, horizon)`.
    fn schedule_until(self: Rc<Self>, user: Rc<User>, horizon: SimTime)
        -> Result<(), ScheduleError>;
}

/// Users that may become interested in uploaded data.
pub type Audience = Rc<RefCell<Vec<Weak<User>>>>;

pub fn new_audience() -> Audience {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn join_audience(audience: &Audience, user: &Rc<User>) {
    audience.borrow_mut().push(Rc::downgrade(user));
}

/// Plan one action per sampled interval until the horizon.
///
/// A zero interval would plan infinitely many actions at the same instant,
/// so it ends the plan early instead.
fn plan_repeating<F, A>(
    scheduler: &EventScheduler,
    interval: &dyn DurationSampler,
    horizon: SimTime,
    mut make_action: F,
) -> Result<usize, ScheduleError>
where
    F: FnMut() -> A,
    A: FnOnce() + 'static,
{
    let mut at = scheduler.now();
    let mut planned = 0;

    loop {
        let step = interval.next_sample();
        if step < 0 {
            return Err(ScheduleError::NegativeDelay { delay: step });
        }
        if step == 0 {
            warn!("zero activity interval, plan ends at {}ns", at);
            break;
        }

        at = at.saturating_add(step as SimTime);
        if at >= horizon {
            break;
        }
        scheduler.schedule_absolute(at, make_action())?;
        planned += 1;
    }

    Ok(planned)
}

// ============================================================================
// Upload
// ============================================================================

/// Periodically publishes a new chunk and makes part of the audience want it.
pub struct UploadActivity {
    pub interval: Box<dyn DurationSampler>,
    /// Virtual chunk size in bytes, rounded and clamped to `[1, max_chunk_size]`
    pub size: Box<dyn Float64Sampler>,
    pub max_chunk_size: u64,
    /// Share of the audience attracted to each upload
    pub attraction_ratio: Box<dyn Float64Sampler>,
    pub permutator: Box<dyn Permutator>,
    pub ids: Rc<dyn IdGenerator>,
    pub audience: Audience,
}

impl UploadActivity {
    fn chunk_size(&self) -> u64 {
        let sampled = self.size.next_sample();
        if sampled.is_nan() {
            return 1;
        }
        sampled.round().clamp(1.0, self.max_chunk_size.max(1) as f64) as u64
    }

    fn upload(&self, user: &Rc<User>) {
        let key = DataKey::new(self.ids.next_id());
        let size = self.chunk_size();
        let origin: ConnectorRef = user.clone();
        user.node()
            .push(RawStorage::create_chunk(key, size), origin);

        // the uploader never queries its own data
        let uploader = user.id();
        let members: Vec<Rc<User>> = self
            .audience
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|member| member.id() != uploader)
            .collect();

        let n = members.len();
        let ratio = self.attraction_ratio.next_sample();
        // NaN casts to 0
        let attracted = (ratio * n as f64).round().clamp(0.0, n as f64) as usize;

        for index in self.permutator.perm(n).into_iter().take(attracted) {
            members[index].attract_to(DataQuery::Key(key));
        }
        trace!(
            "user {} uploaded {:?} ({} bytes), {}/{} attracted",
            uploader,
            key.id,
            size,
            attracted,
            n
        );
    }
}

impl Activity for UploadActivity {
    fn schedule_until(
        self: Rc<Self>,
        user: Rc<User>,
        horizon: SimTime,
    ) -> Result<(), ScheduleError> {
        let scheduler = user.scheduler().clone();
        let weak = Rc::downgrade(&user);
        plan_repeating(&scheduler, &*self.interval, horizon, || {
            let activity = Rc::clone(&self);
            let user = weak.clone();
            move || {
                if let Some(user) = user.upgrade() {
                    activity.upload(&user);
                }
            }
        })?;
        Ok(())
    }
}

// ============================================================================
// Query
// ============================================================================

/// Periodically issues one of the user's attractive queries against its node.
pub struct QueryActivity {
    pub interval: Box<dyn DurationSampler>,
}

impl QueryActivity {
    fn issue(user: &Rc<User>) {
        if let Some(query) = user.pop_attractive_query() {
            let receiver: ConnectorRef = user.clone();
            user.node().query(query, receiver);
        }
    }
}

impl Activity for QueryActivity {
    fn schedule_until(
        self: Rc<Self>,
        user: Rc<User>,
        horizon: SimTime,
    ) -> Result<(), ScheduleError> {
        let scheduler = user.scheduler().clone();
        let weak = Rc::downgrade(&user);
        plan_repeating(&scheduler, &*self.interval, horizon, || {
            let user = weak.clone();
            move || {
                if let Some(user) = user.upgrade() {
                    QueryActivity::issue(&user);
                }
            }
        })?;
        Ok(())
    }
}

// ============================================================================
// Combined
// ============================================================================

/// Runs every child activity over the same horizon.
pub struct CombinedActivity {
    pub activities: Vec<Rc<dyn Activity>>,
}

impl Activity for CombinedActivity {
    fn schedule_until(
        self: Rc<Self>,
        user: Rc<User>,
        horizon: SimTime,
    ) -> Result<(), ScheduleError> {
        for activity in &self.activities {
            Rc::clone(activity).schedule_until(Rc::clone(&user), horizon)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dd_interface::{secs, Chunk, HashIdGenerator, Node, NodeId};
    use crate::dd_random::{seeded_rng, ConstantDuration, ConstantFloat, RngIntner, RngPermutator};
    use crate::dd_samples::{SampleGate, UserStats};
    use crate::dd_user::UserBehavior;

    #[derive(Default)]
    struct RecordingNode {
        pushed: RefCell<Vec<(u64, NodeId)>>,
        queried: RefCell<Vec<(DataQuery, NodeId)>>,
    }

    impl Connector for RecordingNode {
        fn id(&self) -> NodeId {
            NodeId::default()
        }

        fn push(&self, chunk: Chunk, origin: ConnectorRef) {
            let size = RawStorage::size_of(&chunk).unwrap();
            self.pushed.borrow_mut().push((size, origin.id()));
        }

        fn query(&self, query: DataQuery, receiver: ConnectorRef) {
            self.queried.borrow_mut().push((query, receiver.id()));
        }
    }

    impl Node for RecordingNode {
        fn startup(&self) {}

        fn shut_down(&self) {}
    }

    struct Idle;

    impl Activity for Idle {
        fn schedule_until(
            self: Rc<Self>,
            _user: Rc<User>,
            _horizon: SimTime,
        ) -> Result<(), ScheduleError> {
            Ok(())
        }
    }

    fn make_user(
        scheduler: &EventScheduler,
        node: &Rc<RecordingNode>,
        ids: &HashIdGenerator,
    ) -> Rc<User> {
        let behavior = UserBehavior {
            startup: Box::new(ConstantDuration(secs(1))),
            online: Box::new(ConstantDuration(secs(60))),
            activity: Rc::new(Idle),
            selector: Box::new(RngIntner::new(seeded_rng(9))),
            query_timeout: secs(30),
        };
        User::new(
            ids.next_id(),
            node.clone(),
            scheduler.clone(),
            behavior,
            UserStats::new(&SampleGate::default()),
        )
    }

    fn upload_activity(size: f64, ratio: f64, audience: &Audience) -> UploadActivity {
        UploadActivity {
            interval: Box::new(ConstantDuration(secs(1))),
            size: Box::new(ConstantFloat(size)),
            max_chunk_size: 4096,
            attraction_ratio: Box::new(ConstantFloat(ratio)),
            permutator: Box::new(RngPermutator::new(seeded_rng(4))),
            ids: Rc::new(HashIdGenerator::new(99)),
            audience: audience.clone(),
        }
    }

    #[test]
    fn test_upload_attracts_ratio_of_audience() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(2);
        let audience = new_audience();

        let uploader = make_user(&scheduler, &node, &ids);
        join_audience(&audience, &uploader);
        let consumers: Vec<Rc<User>> = (0..10).map(|_| make_user(&scheduler, &node, &ids)).collect();
        for consumer in &consumers {
            join_audience(&audience, consumer);
        }

        let activity = Rc::new(upload_activity(100.0, 0.5, &audience));
        // one upload at 1s
        activity
            .schedule_until(uploader.clone(), secs(1) as SimTime + 1)
            .unwrap();
        scheduler.run();

        assert_eq!(*node.pushed.borrow(), vec![(100u64, uploader.id())]);
        assert!(uploader.attractive_queries().is_empty());

        let attracted: Vec<&Rc<User>> = consumers
            .iter()
            .filter(|c| !c.attractive_queries().is_empty())
            .collect();
        assert_eq!(attracted.len(), 5);

        let wanted = attracted[0].attractive_queries()[0];
        for consumer in attracted {
            assert_eq!(consumer.attractive_queries(), vec![wanted]);
        }
    }

    /// Odd indices first, both halves descending
    struct OddFirst;

    impl Permutator for OddFirst {
        fn perm(&self, n: usize) -> Vec<usize> {
            let odd = (0..n).rev().filter(|i| i % 2 == 1);
            let even = (0..n).rev().filter(|i| i % 2 == 0);
            odd.chain(even).collect()
        }
    }

    #[test]
    fn test_upload_attracts_permutation_prefix() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(7);
        let audience = new_audience();

        let uploader = make_user(&scheduler, &node, &ids);
        join_audience(&audience, &uploader);
        let consumers: Vec<Rc<User>> = (0..10).map(|_| make_user(&scheduler, &node, &ids)).collect();
        for consumer in &consumers {
            join_audience(&audience, consumer);
        }

        let mut activity = upload_activity(100.0, 0.5, &audience);
        activity.permutator = Box::new(OddFirst);
        Rc::new(activity)
            .schedule_until(uploader.clone(), secs(1) as SimTime + 1)
            .unwrap();
        scheduler.run();

        // the uploader is skipped, so indices address `consumers` directly
        let attracted: Vec<usize> = consumers
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.attractive_queries().is_empty())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(attracted, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_upload_size_is_clamped() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(3);
        let audience = new_audience();
        let user = make_user(&scheduler, &node, &ids);

        for size in [1e12, -3.0, f64::NAN, 41.6] {
            Rc::new(upload_activity(size, 0.0, &audience))
                .schedule_until(user.clone(), scheduler.now() + secs(1) as SimTime + 1)
                .unwrap();
            scheduler.run();
        }

        let sizes: Vec<u64> = node.pushed.borrow().iter().map(|(s, _)| *s).collect();
        assert_eq!(sizes, vec![4096, 1, 1, 42]);
    }

    #[test]
    fn test_query_activity_respects_horizon() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(4);
        let user = make_user(&scheduler, &node, &ids);
        for _ in 0..5 {
            user.attract_to(DataQuery::Key(DataKey::new(ids.next_id())));
        }

        let activity = Rc::new(QueryActivity {
            interval: Box::new(ConstantDuration(secs(1))),
        });
        // actions at 1s and 2s only; 3s is the horizon itself
        activity
            .schedule_until(user.clone(), secs(3) as SimTime)
            .unwrap();
        assert_eq!(scheduler.pending(), 2);
        scheduler.run();

        let queried = node.queried.borrow();
        assert_eq!(queried.len(), 2);
        assert!(queried.iter().all(|(_, receiver)| *receiver == user.id()));
        assert_eq!(user.attractive_queries().len(), 3);
    }

    #[test]
    fn test_query_activity_without_attractive_queries() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(5);
        let user = make_user(&scheduler, &node, &ids);

        Rc::new(QueryActivity {
            interval: Box::new(ConstantDuration(secs(1))),
        })
        .schedule_until(user.clone(), secs(5) as SimTime)
        .unwrap();
        scheduler.run();

        assert!(node.queried.borrow().is_empty());
        assert!(user.pending_queries().is_empty());
    }

    #[test]
    fn test_combined_runs_every_child() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(6);
        let audience = new_audience();
        let user = make_user(&scheduler, &node, &ids);
        user.attract_to(DataQuery::Key(DataKey::new(ids.next_id())));

        let combined = Rc::new(CombinedActivity {
            activities: vec![
                Rc::new(upload_activity(10.0, 1.0, &audience)) as Rc<dyn Activity>,
                Rc::new(QueryActivity {
                    interval: Box::new(ConstantDuration(secs(2))),
                }),
            ],
        });
        combined
            .schedule_until(user.clone(), secs(4) as SimTime + 1)
            .unwrap();
        scheduler.run();

        // uploads at 1s..4s, queries at 2s and 4s (the second finds nothing)
        assert_eq!(node.pushed.borrow().len(), 4);
        assert_eq!(node.queried.borrow().len(), 1);
    }

    #[test]
    fn test_negative_interval_is_rejected() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(7);
        let user = make_user(&scheduler, &node, &ids);

        let result = Rc::new(QueryActivity {
            interval: Box::new(ConstantDuration(-1)),
        })
        .schedule_until(user, secs(5) as SimTime);

        assert_eq!(result, Err(ScheduleError::NegativeDelay { delay: -1 }));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_zero_interval_plans_nothing() {
        let scheduler = EventScheduler::new();
        let node = Rc::new(RecordingNode::default());
        let ids = HashIdGenerator::new(8);
        let user = make_user(&scheduler, &node, &ids);

        Rc::new(QueryActivity {
            interval: Box::new(ConstantDuration(0)),
        })
        .schedule_until(user, secs(5) as SimTime)
        .unwrap();

        assert_eq!(scheduler.pending(), 0);
    }
}
