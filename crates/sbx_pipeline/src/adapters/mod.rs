pub mod identity;
pub mod object_store;
pub mod record_store;

pub use identity::IdentityProvider;
pub use object_store::{ObjectStore, StoredObject};
pub use record_store::{ExperimentSummary, RecordStore};
