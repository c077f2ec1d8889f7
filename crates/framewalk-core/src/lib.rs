pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::RuntimeConfig;
pub use error::{FramewalkError, Result};
pub use event::EventBus;
pub use types::*;
