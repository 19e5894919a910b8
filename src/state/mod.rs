//! In-memory records for everything the agent supervises.
//!
//! Ownership runs strictly downward: the agent owns [`Framework`] records,
//! a framework owns its [`Executor`] records, and an executor owns its
//! [`Task`] records. Completed entries move into bounded histories; executor
//! history entries are reference-counted because introspection reads may
//! still hold them after removal from the active set.

pub mod executor;
pub mod framework;
pub mod task;

pub use executor::{Executor, RemovedTask};
pub use framework::Framework;
pub use task::Task;
