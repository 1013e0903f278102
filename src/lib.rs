pub mod config;
pub mod model;

// Re-export commonly used types for convenience
pub use config::{CNetConfig, RnnMode};
pub use model::{CNet, Dru, RnnState};
