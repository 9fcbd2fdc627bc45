#![forbid(unsafe_code)]

pub mod config;
pub mod detector;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod intent;
pub mod plan;
pub mod planner;
pub mod provider;
pub mod specvalue;
pub mod telemetry;

pub use config::{Cli, Command};
pub use error::{Result, ThinCiError};
pub use exec::Executor;
pub use plan::{Job, Plan, PlanMetadata};
pub use planner::{PlanRequest, generate_plan};
pub use provider::{ProviderMetadata, ProviderRegistry};
