pub mod api;
pub mod config;
mod engine;
mod integrations;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::CoverState;
pub use engine::Engine;
pub use engine::GateCommand;
pub use engine::GateState;
pub use engine::State;
