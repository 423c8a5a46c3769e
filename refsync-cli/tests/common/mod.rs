//! Shared fixtures: a category table with a self-lookup, a fund table
//! pointing at categories, and a category/fund N:N relationship.

#![allow(dead_code)]

use refsync::api::{EntitySchema, FieldMetadata, FieldType, InMemoryService, ManyToManyMetadata};
use refsync::sync::{AttributeValue, EntityReference, Record};

pub const CATEGORY: &str = "nrq_category";
pub const FUND: &str = "nrq_fund";
pub const CATEGORY_FUND: &str = "nrq_category_nrq_fund";

pub fn category_schema() -> EntitySchema {
    EntitySchema::new(CATEGORY, "nrq_categories", "nrq_categoryid")
        .with_primary_name("nrq_name")
        .with_field(FieldMetadata::new("nrq_categoryid", FieldType::UniqueIdentifier))
        .with_field(FieldMetadata::new("nrq_name", FieldType::String))
        .with_field(FieldMetadata::new("nrq_rank", FieldType::Integer))
        .with_field(FieldMetadata::lookup("nrq_parentid", CATEGORY))
        .with_field(FieldMetadata::new("statecode", FieldType::State))
        .with_field(FieldMetadata::new("statuscode", FieldType::Status))
        .with_field(FieldMetadata::new("modifiedon", FieldType::DateTime).read_only())
}

pub fn fund_schema() -> EntitySchema {
    EntitySchema::new(FUND, "nrq_funds", "nrq_fundid")
        .with_primary_name("nrq_name")
        .with_field(FieldMetadata::new("nrq_fundid", FieldType::UniqueIdentifier))
        .with_field(FieldMetadata::new("nrq_name", FieldType::String))
        .with_field(FieldMetadata::lookup("nrq_categoryid", CATEGORY))
}

pub fn category_fund() -> ManyToManyMetadata {
    ManyToManyMetadata {
        schema_name: CATEGORY_FUND.to_string(),
        intersect_entity: CATEGORY_FUND.to_string(),
        entity1: CATEGORY.to_string(),
        entity1_key: "nrq_categoryid".to_string(),
        entity2: FUND.to_string(),
        entity2_key: "nrq_fundid".to_string(),
    }
}

fn reference(entity: &str, id: Option<&str>) -> AttributeValue {
    id.map(|id| AttributeValue::Reference(EntityReference::new(entity, id)))
        .unwrap_or(AttributeValue::Null)
}

/// Active category with an optional parent
pub fn category(id: &str, name: &str, parent: Option<&str>) -> Record {
    Record::new(CATEGORY, id)
        .with("nrq_name", AttributeValue::String(name.to_string()))
        .with("nrq_rank", AttributeValue::Int(1))
        .with("nrq_parentid", reference(CATEGORY, parent))
        .with("statecode", AttributeValue::Choice(0))
        .with("statuscode", AttributeValue::Choice(1))
}

pub fn inactive(record: Record) -> Record {
    record
        .with("statecode", AttributeValue::Choice(1))
        .with("statuscode", AttributeValue::Choice(2))
}

pub fn fund(id: &str, name: &str, category: Option<&str>) -> Record {
    Record::new(FUND, id)
        .with("nrq_name", AttributeValue::String(name.to_string()))
        .with("nrq_categoryid", reference(CATEGORY, category))
}

/// `count` parentless categories with ids c00, c01, ...
pub fn categories(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| category(&format!("c{:02}", i), &format!("Category {}", i), None))
        .collect()
}

/// Environment with both schemas and the relationship registered, no data
pub fn environment(name: &str) -> InMemoryService {
    InMemoryService::new(name)
        .with_schema(category_schema())
        .with_schema(fund_schema())
        .with_relationship(category_fund())
}
