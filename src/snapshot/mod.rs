mod schema;
mod store;

pub use schema::{RunStats, SNAPSHOT_SCHEMA_VERSION, Snapshot};
pub use store::{FileSnapshotStore, SharedStore, SnapshotStore};

pub(crate) use store::write_new_record;
