pub mod memory;
pub mod mongo;
pub mod types;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use types::{NewFile, StatusUpdate, Store, UpsertOutcome};
