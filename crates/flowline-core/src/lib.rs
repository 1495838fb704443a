pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{AppConfig, WorkflowConfig};
pub use error::{ErrorKind, FlowError, Result};
pub use types::*;
