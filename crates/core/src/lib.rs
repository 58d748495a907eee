pub mod alert;
pub mod config;
pub mod error;

pub use alert::*;
pub use config::{AlertListConfig, ArtifactConfig, Config, DetectionConfig, ServerConfig};
pub use error::*;
