//! The question engine core: attempts, usages and change tracking. Nothing
//! in here performs I/O.

pub mod attempt;
pub mod error;
pub mod flags;
pub mod observer;
pub mod usage;

pub use attempt::Attempt;
pub use error::{EngineError, EngineResult};
pub use flags::{flag_checksum, verify_flag_checksum};
pub use observer::{NullObserver, PendingChanges, UnitOfWork, UsageObserver};
pub use usage::Usage;
