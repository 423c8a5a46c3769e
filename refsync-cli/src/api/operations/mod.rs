//! Dynamics 365 Operations Module
//!
//! Write operations and the `$batch` wire format used to submit them.

pub mod batch;
pub mod operation;

pub use batch::{BatchPart, BatchRequest, parse_batch_response};
pub use operation::{BatchResponse, Fields, Operation, OperationResult};
