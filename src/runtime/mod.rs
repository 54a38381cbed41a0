pub mod deadline;
pub mod process_registry;
pub mod storage;

pub use deadline::Deadline;
pub use process_registry::{ProcessEntry, ProcessRegistry};
pub use storage::{QuotaStatus, StorageManager};
