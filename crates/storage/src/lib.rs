pub mod activity;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use activity::{ActivityDescriptor, ActivityKind, ActivityLog, ActivityRecord, SqliteActivityLog};
pub use error::StorageError;
pub use sqlite::{SqliteStorage, UnitOfWork};
pub use traits::*;
