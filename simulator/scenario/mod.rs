// Scenario Simulator Module

pub mod cache_node;
pub mod config;
pub mod runner;

// Re-export commonly used types
pub use config::ScenarioConfig;
pub use runner::ScenarioRunner;
