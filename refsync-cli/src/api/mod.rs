//! Dynamics 365 Web API access
//!
//! [`RecordService`] is the seam between the sync engine and an environment.
//! [`DynamicsClient`] talks to a live organization; [`InMemoryService`] keeps
//! everything in process memory.

pub mod auth;
pub mod client;
pub mod memory;
pub mod metadata;
pub mod operations;
pub mod retry;
pub mod service;

pub use auth::{AuthManager, TokenInfo};
pub use client::DynamicsClient;
pub use memory::InMemoryService;
pub use metadata::{EntitySchema, FieldMetadata, FieldType, ManyToManyMetadata};
pub use operations::{BatchResponse, Operation, OperationResult};
pub use retry::RetryConfig;
pub use service::RecordService;
