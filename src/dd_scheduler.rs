use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::dd_interface::{SimDuration, SimTime, TimeProvider, EPOCH};
use crate::dd_sorted_queue::{LessThan, SortedQueue};

/// Precondition violations when scheduling an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("negative delay: {delay}ns")]
    NegativeDelay { delay: SimDuration },

    #[error("time travel: cannot schedule at {time}ns, simulation is at {now}ns")]
    InThePast { time: SimTime, now: SimTime },
}

pub type Action = Box<dyn FnOnce()>;
pub type ExecHook = Rc<dyn Fn(SimTime)>;

struct Event {
    time: SimTime,
    action: Action,
}

impl LessThan for Event {
    fn is_less_than(&self, other: &Self) -> bool {
        self.time < other.time
    }
}

struct SchedulerInner {
    now: SimTime,
    queue: SortedQueue<Event>,
    stopped: bool,
    hooks: Vec<ExecHook>,
    executed: u64,
}

/// Discrete event scheduler and the single authority for simulated time.
///
/// The scheduler is a cheap handle (`Clone` shares the same queue and clock),
/// so actions can capture it and schedule follow-up actions. No internal
/// borrow is held while an action or hook runs.
///
/// # Ordering
/// Events run one at a time in nondecreasing time order. Events at the same
/// time run in the order they were scheduled. An action scheduled while
/// another action executes is only eligible for a later `exec_next()`, so a
/// zero-delay action that reschedules itself cannot starve the loop.
///
/// # Example
/// ```rust
/// use dd_sim::dd_scheduler::EventScheduler;
/// use dd_sim::dd_interface::ms;
///
/// let scheduler = EventScheduler::new();
/// let handle = scheduler.clone();
/// scheduler
///     .schedule(ms(10), move || assert_eq!(handle.now(), 10_000_000))
///     .unwrap();
///
/// scheduler.run();
/// assert_eq!(scheduler.now(), 10_000_000);
/// ```
#[derive(Clone)]
pub struct EventScheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                now: EPOCH,
                queue: SortedQueue::new(),
                stopped: false,
                hooks: Vec::new(),
                executed: 0,
            })),
        }
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.inner.borrow().now
    }

    /// Schedule `action` to run `delay` after now.
    ///
    /// # Errors
    /// `ScheduleError::NegativeDelay` if `delay < 0`; nothing is queued.
    pub fn schedule<F>(&self, delay: SimDuration, action: F) -> Result<(), ScheduleError>
    where
        F: FnOnce() + 'static,
    {
        if delay < 0 {
            return Err(ScheduleError::NegativeDelay { delay });
        }

        let mut inner = self.inner.borrow_mut();
        let time = inner.now.saturating_add(delay as SimTime);
        inner.queue.insert(Event {
            time,
            action: Box::new(action),
        });
        Ok(())
    }

    /// Schedule `action` at an absolute simulated time.
    ///
    /// # Errors
    /// `ScheduleError::InThePast` if `time` precedes now; nothing is queued.
    pub fn schedule_absolute<F>(&self, time: SimTime, action: F) -> Result<(), ScheduleError>
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        if time < inner.now {
            return Err(ScheduleError::InThePast {
                time,
                now: inner.now,
            });
        }

        inner.queue.insert(Event {
            time,
            action: Box::new(action),
        });
        Ok(())
    }

    /// Resume, then execute events until none remain or `stop()` is observed.
    pub fn run(&self) {
        self.resume();
        debug!("scheduler run at {}ns ({} pending)", self.now(), self.pending());

        while !self.is_stopped() && self.exec_next() {}

        debug!(
            "scheduler halted at {}ns ({} pending, {} executed)",
            self.now(),
            self.pending(),
            self.executed()
        );
    }

    /// Execute the earliest pending event.
    ///
    /// Time advances to the event's time before its action runs; registered
    /// hooks are invoked afterwards in registration order. Returns `false` if
    /// the queue was empty.
    pub fn exec_next(&self) -> bool {
        let Event { time, action } = {
            let mut inner = self.inner.borrow_mut();
            let Some(event) = inner.queue.pop() else {
                return false;
            };
            inner.now = event.time;
            inner.executed += 1;
            event
        };

        trace!("exec event at {}ns", time);
        action();

        let hooks = self.inner.borrow().hooks.clone();
        for hook in hooks {
            hook(time);
        }

        true
    }

    /// Cooperative halt, checked by `run()` before each event.
    pub fn stop(&self) {
        debug!("scheduler stop requested at {}ns", self.now());
        self.inner.borrow_mut().stopped = true;
    }

    pub fn resume(&self) {
        self.inner.borrow_mut().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.borrow().stopped
    }

    /// Drop every pending event and rewind to the epoch.
    pub fn reset(&self) {
        let discarded = {
            let mut inner = self.inner.borrow_mut();
            inner.now = EPOCH;
            inner.stopped = false;
            inner.executed = 0;
            std::mem::take(&mut inner.queue)
        };
        debug!("scheduler reset, discarding {} events", discarded.len());
        // actions are dropped outside the borrow, their captures may hold handles
        drop(discarded);
    }

    /// Observe every executed event (instrumentation only).
    pub fn register_for_exec_event<F>(&self, hook: F)
    where
        F: Fn(SimTime) + 'static,
    {
        self.inner.borrow_mut().hooks.push(Rc::new(hook));
    }

    /// Number of queued events
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Number of events executed since creation or the last reset
    pub fn executed(&self) -> u64 {
        self.inner.borrow().executed
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for EventScheduler {
    fn time(&self) -> SimTime {
        self.now()
    }
}
