//! # dd-sim - Deterministic Data-Distribution Simulator
//!
//! A discrete-event simulation substrate for peer-to-peer data-distribution
//! networks. Simulated time, network delay, per-node storage and user
//! behavior are all driven from one ordered event stream, so a run is fully
//! reproducible from its seed.
//!
//! ## Core Components
//!
//! - **EventScheduler**: single authority for "now"; executes deferred actions in time order
//! - **SortedQueue**: FIFO-stable priority queue backing the scheduler
//! - **RawStorage**: capacity-accounted, priority-ordered chunk storage with expiry
//! - **DelayNetwork**: wraps peers so every call pays latency and bandwidth
//! - **User**: online/offline cycling actor tracking its pending queries
//! - **Activities**: upload and query behaviors scheduled while a user is online
//!
//! ## Usage
//!
//! Peer logic plugs in through the `Connector` and `Node` traits. Wire nodes
//! together through a `DelayNetwork`, bind a `User` to each node and run the
//! scheduler:
//!
//! ```no_run
//! use dd_sim::dd_scheduler::EventScheduler;
//! use dd_sim::dd_interface::secs;
//!
//! let scheduler = EventScheduler::new();
//!
//! // build nodes, users and activities against `scheduler`, then:
//! let handle = scheduler.clone();
//! scheduler.schedule(secs(3600), move || handle.stop()).unwrap();
//! scheduler.run();
//! ```
//!
//! ## Scenario Runs
//!
//! `simulator/` holds a caching peer and a YAML-driven scenario runner
//! (`cargo run --bin scenario_runner scenarios/small_network.yaml`).

// Simulation substrate
pub mod dd_interface;
pub mod dd_scheduler;
pub mod dd_sorted_queue;
pub mod dd_storage;

// Actors
pub mod dd_activity;
pub mod dd_network;
pub mod dd_user;

// Randomness and measurement
pub mod dd_random;
pub mod dd_samples;

pub use dd_activity::{Activity, Audience, CombinedActivity, QueryActivity, UploadActivity};
pub use dd_interface::{Chunk, Connector, DataKey, DataQuery, Id, Node, SimDuration, SimTime};
pub use dd_network::{DelayNetwork, NetworkProperties};
pub use dd_samples::{Discrete, SampleGate, UserStats};
pub use dd_scheduler::{EventScheduler, ScheduleError};
pub use dd_storage::{RawStorage, StorageError};
pub use dd_user::{User, UserBehavior, UserPhase};
