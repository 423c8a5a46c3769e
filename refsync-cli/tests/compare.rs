mod common;

use std::collections::HashSet;

use common::*;
use refsync::config::{ManyToManyConfig, SyncConfig, TableSyncConfig};
use refsync::sync::{
    AttributeValue, CompareOptions, DifferenceType, Record, RecordSet, compare_environments,
    compare_records,
};

fn person(id: &str, name: &str) -> Record {
    Record::new("contact", id).with("name", AttributeValue::String(name.to_string()))
}

fn people(records: impl IntoIterator<Item = Record>) -> RecordSet {
    RecordSet::from_records("contact", records)
}

#[test]
fn new_modified_and_deleted_records() {
    let source = people([person("a", "Alice"), person("b", "Bob")]);
    let target = people([person("a", "Alicia"), person("c", "Carl")]);

    let result = compare_records("contact", &source, &target, &CompareOptions::default());

    let ids = |kind: DifferenceType| -> Vec<&str> {
        result
            .differences
            .iter()
            .filter(|d| d.difference_type == kind)
            .map(|d| d.record_id.as_str())
            .collect()
    };
    assert_eq!(ids(DifferenceType::New), vec!["b"]);
    assert_eq!(ids(DifferenceType::Deleted), vec!["c"]);
    assert_eq!(ids(DifferenceType::Modified), vec!["a"]);

    let modified = result
        .differences
        .iter()
        .find(|d| d.difference_type == DifferenceType::Modified)
        .unwrap();
    assert_eq!(modified.display_name, "Alice");
    assert_eq!(modified.field_differences.len(), 1);
    let field = &modified.field_differences[0];
    assert_eq!(field.field, "name");
    assert_eq!(field.source_value.as_deref(), Some("Alice"));
    assert_eq!(field.target_value.as_deref(), Some("Alicia"));
}

#[test]
fn identical_sets_have_no_differences() {
    let records = categories(10);
    let source = RecordSet::from_records(CATEGORY, records.clone());
    let target = RecordSet::from_records(CATEGORY, records);

    let result = compare_records(CATEGORY, &source, &target, &CompareOptions::default());
    assert!(!result.has_differences());
    assert_eq!((result.source_count, result.target_count), (10, 10));
}

#[test]
fn each_record_lands_in_one_category() {
    let source = people([person("a", "Alice"), person("b", "Bob"), person("d", "Dora")]);
    let target = people([person("a", "Alicia"), person("c", "Carl"), person("d", "Dora")]);

    let result = compare_records("contact", &source, &target, &CompareOptions::default());

    let mut seen = HashSet::new();
    for difference in &result.differences {
        assert!(seen.insert(difference.record_id.as_str()), "{} listed twice", difference.record_id);
    }
    assert!(!seen.contains("d"));
}

#[test]
fn excluded_and_system_fields_are_ignored() {
    let source = people([person("a", "Alice")
        .with("modifiedon", AttributeValue::String("2026-01-01".to_string()))
        .with("nickname", AttributeValue::String("Al".to_string()))]);
    let target = people([person("a", "Alice")
        .with("modifiedon", AttributeValue::String("2026-02-01".to_string()))
        .with("nickname", AttributeValue::String("Ally".to_string()))]);

    let excluded = vec!["nickname".to_string()];
    let options = CompareOptions {
        exclude_fields: &excluded,
        ..Default::default()
    };
    assert!(!compare_records("contact", &source, &target, &options).has_differences());
    assert!(compare_records("contact", &source, &target, &CompareOptions::default()).has_differences());
}

#[test]
fn key_like_fields_follow_the_primary_key_override() {
    let source = people([person("a", "Alice").with("externalid", AttributeValue::String("X1".to_string()))]);
    let target = people([person("a", "Alice").with("externalid", AttributeValue::String("X2".to_string()))]);

    // "externalid" looks like a key and is skipped by default
    assert!(!compare_records("contact", &source, &target, &CompareOptions::default()).has_differences());

    let named = CompareOptions {
        primary_id_field: Some("contactid"),
        ..Default::default()
    };
    assert!(compare_records("contact", &source, &target, &named).has_differences());

    let heuristic_off = CompareOptions {
        infer_primary_keys: false,
        ..Default::default()
    };
    assert!(compare_records("contact", &source, &target, &heuristic_off).has_differences());
}

#[tokio::test]
async fn environments_are_compared_without_writing() {
    let source = environment("dev")
        .with_records(
            CATEGORY,
            [category("c1", "Equity", None), category("c2", "Bonds", None)],
        )
        .with_records(FUND, [fund("f1", "Growth", Some("c1"))])
        .with_association(CATEGORY_FUND, "c1", "f1");
    let target = environment("test")
        .with_records(
            CATEGORY,
            [category("c1", "Equities", None), category("c3", "Cash", None)],
        )
        .with_records(FUND, [fund("f1", "Growth", Some("c1"))])
        .with_association(CATEGORY_FUND, "c3", "f1");

    let config = SyncConfig {
        tables: vec![TableSyncConfig::new(CATEGORY), TableSyncConfig::new(FUND)],
        many_to_many: vec![ManyToManyConfig::named(CATEGORY_FUND)],
        ..Default::default()
    };
    let result = compare_environments(&source, &target, &config).await.unwrap();

    assert_eq!(result.source_env, "dev");
    assert_eq!(result.target_env, "test");

    let categories = &result.tables[0];
    assert_eq!(
        (categories.new_count(), categories.modified_count(), categories.deleted_count()),
        (1, 1, 1)
    );
    assert!(!result.tables[1].has_differences());

    let relationship = &result.relationships[0];
    assert_eq!(relationship.relationship, CATEGORY_FUND);
    assert_eq!((relationship.new_count(), relationship.deleted_count()), (1, 1));
    let added = relationship
        .differences
        .iter()
        .find(|d| d.difference_type == DifferenceType::New)
        .unwrap();
    assert_eq!(added.name1.as_deref(), Some("Equity"));
    assert_eq!(added.name2.as_deref(), Some("Growth"));

    assert_eq!(result.total_differences(), 5);
    assert_eq!(source.batch_calls() + target.batch_calls(), 0);
}

#[tokio::test]
async fn unresolvable_relationship_keeps_other_results() {
    let source = environment("dev")
        .with_records(CATEGORY, [category("c1", "Equity", None)])
        .with_association(CATEGORY_FUND, "c1", "f1");
    let target = environment("test");

    let config = SyncConfig {
        tables: vec![TableSyncConfig::new(CATEGORY)],
        many_to_many: vec![
            ManyToManyConfig::named("nrq_missing"),
            ManyToManyConfig::named(CATEGORY_FUND),
        ],
        ..Default::default()
    };
    let result = compare_environments(&source, &target, &config).await.unwrap();

    assert_eq!(result.tables.len(), 1);
    assert_eq!(result.tables[0].new_count(), 1);

    let missing = &result.relationships[0];
    assert_eq!(missing.relationship, "nrq_missing");
    assert!(missing.error.as_deref().unwrap().contains("nrq_missing"));
    assert!(missing.differences.is_empty());

    let resolved = &result.relationships[1];
    assert!(resolved.error.is_none());
    assert_eq!(resolved.new_count(), 1);

    assert!(result.has_errors());
    let json = serde_json::to_value(&result).unwrap();
    assert!(json["relationships"][0]["error"].is_string());
    assert!(json["relationships"][1].get("error").is_none());
}
