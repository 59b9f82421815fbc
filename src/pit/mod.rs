pub mod ids;
pub mod store;

pub use ids::IdGenerator;
pub use store::{PitStore, SnapshotMetadata};
