pub mod app;
pub mod config;
pub mod telemetry;

pub use app::{AppState, build_orchestrator, router};
pub use config::AppConfig;
