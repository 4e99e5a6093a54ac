//! cover Workers Library
//!
//! The worker process runs on every instance of the cover deployment,
//! next to the web app. It hosts two independent, cooperatively-suspending
//! loops:
//!
//! - **Singleton scheduler**: periodic jobs gated on fleet leadership,
//!   re-derived from the registry on every tick
//! - **Queue worker**: leader-independent consumption of the external
//!   work queue
//!
//! Neither loop is allowed to die: task failures, registry outages, and
//! queue outages are logged and the loops carry on.

// Internal modules exposed for integration tests
pub mod config;
pub mod queue;
pub mod scheduler;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use queue::{HttpWorkQueue, InMemoryQueue, QueueError, WorkItem, WorkQueue};
pub use scheduler::{SingletonScheduler, TaskState};
pub use worker::{run_worker_loop, LogHandler, WorkHandler};
