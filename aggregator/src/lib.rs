pub mod coordinator;
pub mod hub;
pub mod round;
pub mod service;
pub mod store;

pub use coordinator::{Coordinator, Submission};
pub use hub::{BroadcastHub, Subscription};
pub use round::{Contribution, RoundState};
pub use service::SyncServer;
pub use store::{SnapshotPayload, VersionStore};
