pub mod config;
pub mod engine;
pub mod error;
pub mod stats;
pub mod target;
pub mod threshold;
pub mod utils;

pub use config::{ScenarioConfig, TestPlan};
pub use engine::{RunReport, RunStatus, Scheduler, TestRunState, Verdict};
pub use utils::parse_duration_str;
