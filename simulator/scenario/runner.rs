// Scenario Runner
//
// Builds a network of caching nodes with one user each, runs it on the
// event scheduler until the configured horizon and reports the query
// statistics collected after warm-up.

use super::cache_node::{CacheNode, NodeCounters, NodeSettings};
use super::config::ScenarioConfig;
use dd_sim::dd_activity::{
    join_audience, new_audience, Activity, CombinedActivity, QueryActivity, UploadActivity,
};
use dd_sim::dd_interface::{
    as_secs_f64, ms, secs_f64, Connector, HashIdGenerator, IdGenerator, SimTime,
};
use dd_sim::dd_network::{DelayNetwork, NetworkProperties};
use dd_sim::dd_random::{
    seeded_rng, ExponentialDuration, RngIntner, RngPermutator, SharedRng, UniformFloat,
};
use dd_sim::dd_samples::{Discrete, SampleGate, UserStats};
use dd_sim::dd_scheduler::{EventScheduler, ScheduleError};
use dd_sim::dd_user::{User, UserBehavior};
use hashbrown::HashSet;
use log::info;
use rand::Rng;
use std::cell::Cell;
use std::rc::Rc;

// ============================================================================
// Result
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    pub seed: u64,
    pub nodes: usize,
    pub links: usize,
    pub simulated_secs: f64,
    pub events_executed: u64,
    pub events_pending: usize,
    /// Seconds from issuing a query to receiving its data
    pub durations: Discrete,
    /// 1 per answered query, 0 per failed one
    pub successes: Discrete,
    pub node_totals: NodeCounters,
    /// Chunks held across all nodes at the end of the run
    pub cached_chunks: usize,
    pub cached_bytes: u64,
}

impl ScenarioResult {
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║    DATA DISTRIBUTION SIMULATION RESULTS                ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Scenario: {} (seed {})", self.name, self.seed);
        println!("Simulated: {:.1}s", self.simulated_secs);
        println!();

        println!("═══ Network ═══");
        println!("  Nodes: {}", self.nodes);
        println!("  Links: {}", self.links);
        println!();

        println!("═══ Queries ═══");
        println!("  Sampled: {}", self.successes.count());
        println!("  Success Rate: {:.1}%", self.successes.mean() * 100.0);
        println!("  Wait (s): {}", self.durations);
        println!();

        println!("═══ Node Activity ═══");
        println!("  Stored: {}", self.node_totals.stored);
        println!("  Evicted: {}", self.node_totals.evicted);
        println!("  Storage Hits: {}", self.node_totals.hits);
        println!("  Forwarded Queries: {}", self.node_totals.forwarded);
        println!("  Relayed Chunks: {}", self.node_totals.relayed);
        println!("  Cached at End: {} chunks, {} bytes", self.cached_chunks, self.cached_bytes);
        println!();

        println!("═══ Scheduler ═══");
        println!("  Events Executed: {}", self.events_executed);
        println!("  Events Pending: {}", self.events_pending);
        println!();
    }
}

// ============================================================================
// Runner
// ============================================================================

pub struct ScenarioRunner {
    config: ScenarioConfig,
}

impl ScenarioRunner {
    pub fn new(config: ScenarioConfig) -> Self {
        Self { config }
    }

    pub fn run(self) -> Result<ScenarioResult, ScheduleError> {
        let config = &self.config;
        let seed = config.run.seed;
        let horizon = secs_f64(config.run.duration_secs).max(0) as SimTime;
        let warmup = secs_f64(config.run.warmup_secs).max(0) as SimTime;

        let scheduler = EventScheduler::new();
        let rng = seeded_rng(seed);
        let ids = Rc::new(HashIdGenerator::new(seed));

        // 1. Nodes and links
        let nodes = self.build_nodes(&scheduler, &*ids);
        let network = DelayNetwork::new(
            scheduler.clone(),
            NetworkProperties::new(ms(config.network.latency_ms as i64), config.network.bandwidth),
        );
        let links = self.link_nodes(&nodes, &network, &rng);

        // 2. Users, closed gate during warm-up
        let gate = SampleGate::new(warmup == 0);
        let stats = UserStats::new(&gate);
        let users = self.build_users(&scheduler, &nodes, &ids, &rng, &stats);
        for user in &users {
            user.activate()?;
        }

        if warmup > 0 {
            let gate = gate.clone();
            scheduler.schedule_absolute(warmup, move || {
                info!("warm-up over, collecting samples");
                gate.open();
            })?;
        }

        let handle = scheduler.clone();
        scheduler.schedule_absolute(horizon, move || handle.stop())?;

        let next_report = Cell::new(horizon / 10);
        scheduler.register_for_exec_event(move |time| {
            if time >= next_report.get() && next_report.get() > 0 {
                info!("simulated {:.0}s", as_secs_f64(time as i64));
                next_report.set(next_report.get().saturating_add(horizon / 10));
            }
        });

        // 3. Run
        info!(
            "running {} nodes, {} links for {:.0}s",
            nodes.len(),
            links,
            as_secs_f64(horizon as i64)
        );
        scheduler.run();

        let mut node_totals = NodeCounters::default();
        let mut cached_chunks = 0;
        let mut cached_bytes = 0;
        for node in &nodes {
            node_totals.merge(&node.counters());
            cached_chunks += node.stored_chunks();
            cached_bytes += config.nodes.storage_capacity.saturating_sub(node.free_storage());
        }

        let durations = stats.durations.borrow().clone();
        let successes = stats.successes.borrow().clone();
        let result = ScenarioResult {
            name: config
                .meta
                .name
                .clone()
                .unwrap_or_else(|| "unnamed".to_string()),
            seed,
            nodes: nodes.len(),
            links,
            simulated_secs: as_secs_f64(scheduler.now() as i64),
            events_executed: scheduler.executed(),
            events_pending: scheduler.pending(),
            durations,
            successes,
            node_totals,
            cached_chunks,
            cached_bytes,
        };

        // pending actions hold user and node handles, links hold each other
        scheduler.reset();
        for node in &nodes {
            node.disconnect_all();
        }
        Ok(result)
    }

    fn build_nodes(&self, scheduler: &EventScheduler, ids: &dyn IdGenerator) -> Vec<Rc<CacheNode>> {
        let settings = NodeSettings {
            storage_capacity: self.config.nodes.storage_capacity,
            data_lifetime: secs_f64(self.config.nodes.data_lifetime_secs),
            forward_retry: secs_f64(self.config.users.query_timeout_secs),
        };

        (0..self.config.nodes.count)
            .map(|_| CacheNode::new(ids.next_id(), scheduler.clone(), settings.clone()))
            .collect()
    }

    /// Random bidirectional links, every direction seen through the delay network.
    fn link_nodes(&self, nodes: &[Rc<CacheNode>], network: &Rc<DelayNetwork>, rng: &SharedRng) -> usize {
        let n = nodes.len();
        if n < 2 {
            return 0;
        }

        let mut links: HashSet<(usize, usize)> = HashSet::new();
        let mut ordered = Vec::new();
        for i in 0..n {
            for _ in 0..self.config.nodes.connections_per_node {
                let j = rng.borrow_mut().gen_range(0..n - 1);
                // skip self
                let j = if j >= i { j + 1 } else { j };
                let link = (i.min(j), i.max(j));
                if links.insert(link) {
                    ordered.push(link);
                }
            }
        }

        // hash set order is not deterministic, creation order is
        for &(a, b) in &ordered {
            nodes[a].request_connection_with(network.wrap(nodes[b].clone()));
            nodes[b].request_connection_with(network.wrap(nodes[a].clone()));
        }
        ordered.len()
    }

    fn build_users(
        &self,
        scheduler: &EventScheduler,
        nodes: &[Rc<CacheNode>],
        ids: &Rc<HashIdGenerator>,
        rng: &SharedRng,
        stats: &UserStats,
    ) -> Vec<Rc<User>> {
        let users_cfg = &self.config.users;
        let upload_cfg = &self.config.upload;
        let audience = new_audience();

        let upload = UploadActivity {
            interval: Box::new(ExponentialDuration::new(
                rng.clone(),
                secs_f64(upload_cfg.interval_mean_secs),
            )),
            size: Box::new(UniformFloat::new(
                rng.clone(),
                upload_cfg.min_size,
                upload_cfg.max_size,
            )),
            max_chunk_size: upload_cfg.max_chunk_size,
            attraction_ratio: Box::new(UniformFloat::new(
                rng.clone(),
                upload_cfg.min_attraction,
                upload_cfg.max_attraction,
            )),
            permutator: Box::new(RngPermutator::new(rng.clone())),
            ids: ids.clone(),
            audience: audience.clone(),
        };
        let query = QueryActivity {
            interval: Box::new(ExponentialDuration::new(
                rng.clone(),
                secs_f64(self.config.query.interval_mean_secs),
            )),
        };
        let activity: Rc<dyn Activity> = Rc::new(CombinedActivity {
            activities: vec![Rc::new(upload) as Rc<dyn Activity>, Rc::new(query)],
        });

        nodes
            .iter()
            .map(|node| {
                let behavior = UserBehavior {
                    startup: Box::new(ExponentialDuration::new(
                        rng.clone(),
                        secs_f64(users_cfg.startup_mean_secs),
                    )),
                    online: Box::new(ExponentialDuration::new(
                        rng.clone(),
                        secs_f64(users_cfg.online_mean_secs),
                    )),
                    activity: activity.clone(),
                    selector: Box::new(RngIntner::new(rng.clone())),
                    query_timeout: secs_f64(users_cfg.query_timeout_secs),
                };
                let user = User::new(
                    ids.next_id(),
                    node.clone(),
                    scheduler.clone(),
                    behavior,
                    stats.clone(),
                );
                join_audience(&audience, &user);
                user
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(seed: u64) -> ScenarioConfig {
        let mut config = ScenarioConfig::default();
        config.meta.name = Some("small".to_string());
        config.run.seed = seed;
        config.run.duration_secs = 300.0;
        config.run.warmup_secs = 30.0;
        config.nodes.count = 8;
        config.nodes.storage_capacity = 64 * 1024;
        config.upload.max_size = 4096.0;
        config.upload.max_chunk_size = 4096;
        config.upload.min_attraction = 0.5;
        config.upload.max_attraction = 0.5;
        config
    }

    #[test]
    fn test_run_stops_at_horizon() {
        let result = ScenarioRunner::new(small_config(1)).run().unwrap();

        assert_eq!(result.name, "small");
        assert_eq!(result.nodes, 8);
        assert!(result.links >= 1);
        assert_eq!(result.simulated_secs, 300.0);
        assert!(result.events_executed > 0);
        assert!(result.events_pending > 0, "users cycle forever");
        assert!(result.node_totals.stored > 0);
        assert!(result.successes.count() > 0);
        assert!((0.0..=1.0).contains(&result.successes.mean()));
        assert!(result.durations.count() <= result.successes.count());
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = ScenarioRunner::new(small_config(9)).run().unwrap();
        let b = ScenarioRunner::new(small_config(9)).run().unwrap();

        assert_eq!(a.links, b.links);
        assert_eq!(a.events_executed, b.events_executed);
        assert_eq!(a.node_totals, b.node_totals);
        assert_eq!(a.successes.count(), b.successes.count());
        assert_eq!(a.durations.mean(), b.durations.mean());
    }

    #[test]
    fn test_single_node_has_no_links() {
        let mut config = small_config(3);
        config.nodes.count = 1;
        let result = ScenarioRunner::new(config).run().unwrap();

        assert_eq!(result.links, 0);
        assert_eq!(result.node_totals.forwarded, 0);
    }
}
