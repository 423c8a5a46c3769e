//! Reference data comparison and synchronization for Dynamics 365
//!
//! The [`sync`] module holds the engine: column classification, record
//! comparison, write planning and the multi-pass migrator. [`api`] provides
//! the record services it runs against.

pub mod api;
pub mod cli;
pub mod config;
pub mod report;
pub mod sync;
