pub mod buffer;
pub mod engine;
pub mod error;
mod events;

pub use buffer::ExampleBuffer;
pub use engine::{EngineOptions, SentUpdate, SyncEngine, UpdateOutcome};
pub use error::{ClientErr, Result};
