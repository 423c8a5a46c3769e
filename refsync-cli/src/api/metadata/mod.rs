//! Entity and relationship metadata

pub mod models;

pub use models::{EntitySchema, FieldMetadata, FieldType, ManyToManyMetadata};
