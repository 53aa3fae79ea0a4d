pub mod io;
pub mod buggify;
pub mod clock;
pub mod config;
pub mod dst;
pub mod error;
pub mod lock;
pub mod naming;
pub mod observability;
pub mod orchestrator;
pub mod saga;
pub mod store;
pub mod template;

pub use clock::{Clock, ProductionClock, SimulatedClock, Timestamp};
pub use config::{ManagerConfig, OperationTimeouts, TimeoutPolicy};
pub use error::{ErrorKind, IndexError, RollbackError};
pub use lock::{Lease, LeaseStore, LockError, MemoryLeaseStore, OperationKind};
pub use naming::{physical_name, LogicalName};
pub use orchestrator::{
    CreateOptions, CreateOutcome, DeleteOutcome, IndexManager, IndexManagerBuilder, Reindexer,
    UpdateOptions, UpdateOutcome,
};
pub use saga::OperationLog;
pub use store::{IndexStore, InMemoryIndexStore, ReindexReport, StoreError};
pub use template::Template;
