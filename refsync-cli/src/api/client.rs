//! Dynamics 365 Web API client
//!
//! Implements [`RecordService`] over the OData v4 endpoint of one
//! environment: paged retrieval, FetchXML queries, entity metadata with a
//! per-client cache, `$batch` writes and N:N relationship metadata.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use super::auth::AuthManager;
use super::metadata::{EntitySchema, FieldMetadata, FieldType, ManyToManyMetadata};
use super::operations::batch::error_message;
use super::operations::{
    BatchPart, BatchRequest, BatchResponse, Fields, Operation, OperationResult, parse_batch_response,
};
use super::retry::RetryConfig;
use super::service::RecordService;
use crate::config::Environment;
use crate::sync::record::{Record, RecordSet};
use crate::sync::value::AttributeValue;

pub const API_VERSION: &str = "v9.2";

/// Records requested per page
pub const PAGE_SIZE: u32 = 5000;

const INCLUDE_ANNOTATIONS: &str = "odata.include-annotations=\"*\"";
const MORE_RECORDS: &str = "@Microsoft.Dynamics.CRM.morerecords";
const PAGING_COOKIE: &str = "@Microsoft.Dynamics.CRM.fetchxmlpagingcookie";

/// Web API client for one environment
pub struct DynamicsClient {
    environment: Environment,
    http: reqwest::Client,
    auth: AuthManager,
    retry: RetryConfig,
    schemas: RwLock<HashMap<String, EntitySchema>>,
}

impl DynamicsClient {
    pub fn new(environment: Environment) -> Self {
        let http = reqwest::Client::new();
        Self {
            auth: AuthManager::new(environment.clone(), http.clone()),
            environment,
            http,
            retry: RetryConfig::default(),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn api_url(&self) -> String {
        format!("{}/api/data/{}", self.environment.url, API_VERSION)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.http
            .get(url)
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Accept", "application/json")
            .header(
                "Prefer",
                format!("{},odata.maxpagesize={}", INCLUDE_ANNOTATIONS, PAGE_SIZE),
            )
    }

    /// Send with a bearer token, retrying throttled requests
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut attempt = 0u32;
        let mut reauthenticated = false;

        loop {
            attempt += 1;
            let token = self.auth.token().await?;
            let response = request
                .try_clone()
                .context("Request cannot be retried")?
                .bearer_auth(token)
                .send()
                .await
                .with_context(|| format!("Request to {} failed", self.environment.name))?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                log::debug!("{} rejected the access token, re-authenticating", self.environment.name);
                self.auth.invalidate().await;
                reauthenticated = true;
                continue;
            }

            if let Some(delay) = self.retry.delay_for(status, response.headers(), attempt) {
                log::warn!(
                    "{} returned HTTP {}, retry {}/{} after {:?}",
                    self.environment.name,
                    status,
                    attempt,
                    self.retry.max_attempts - 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Ok(response);
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        log::debug!("GET {}", url);
        let response = ensure_success(self.send(self.get(url)).await?).await?;
        response
            .json()
            .await
            .with_context(|| format!("Invalid JSON from {}", url))
    }

    /// Follow `@odata.nextLink` until every page is read
    async fn fetch_pages(&self, first_url: String, schema: &EntitySchema) -> Result<RecordSet> {
        let mut records = RecordSet::new(&schema.logical_name);
        let mut next = Some(first_url);
        let mut pages = 0;

        while let Some(url) = next.take() {
            let page = self.get_json(&url).await?;
            pages += 1;
            for row in page_rows(&page) {
                records.insert(Record::from_json(schema, row)?);
            }
            next = page
                .get("@odata.nextLink")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        log::debug!(
            "Retrieved {} {} records from {} in {} pages",
            records.len(),
            schema.logical_name,
            self.environment.name,
            pages
        );
        Ok(records)
    }

    async fn fetch_schema(&self, entity: &str) -> Result<EntitySchema> {
        let base = format!("{}/EntityDefinitions(LogicalName='{}')", self.api_url(), odata_literal(entity));

        let definition = self
            .get_json(&format!(
                "{}?$select=LogicalName,EntitySetName,PrimaryIdAttribute,PrimaryNameAttribute\
                 &$expand=Attributes($select=LogicalName,SchemaName,AttributeType,IsValidForCreate,IsValidForUpdate)",
                base
            ))
            .await
            .with_context(|| format!("Failed to load metadata for '{}'", entity))?;

        let lookups = self
            .get_json(&format!(
                "{}/Attributes/Microsoft.Dynamics.CRM.LookupAttributeMetadata?$select=LogicalName,Targets",
                base
            ))
            .await
            .with_context(|| format!("Failed to load lookup targets for '{}'", entity))?;

        parse_entity_schema(&definition, &lookups)
    }

    /// Load every named schema that can be loaded.
    ///
    /// Entities whose metadata fails to load are returned with the error
    /// message; only the operations that need them are affected.
    async fn schemas_for(&self, entities: BTreeSet<String>) -> (HashMap<String, EntitySchema>, HashMap<String, String>) {
        let mut schemas = HashMap::new();
        let mut failures = HashMap::new();
        for entity in entities {
            match self.get_schema(&entity).await {
                Ok(schema) => {
                    schemas.insert(entity, schema);
                }
                Err(e) => {
                    log::warn!("No metadata for '{}' in {}: {:#}", entity, self.environment.name, e);
                    failures.insert(entity, format!("{:#}", e));
                }
            }
        }
        (schemas, failures)
    }
}

#[async_trait]
impl RecordService for DynamicsClient {
    fn environment_name(&self) -> &str {
        &self.environment.name
    }

    async fn retrieve_records(&self, entity: &str, filter: Option<&str>) -> Result<RecordSet> {
        let schema = self.get_schema(entity).await?;
        let mut url = format!("{}/{}", self.api_url(), schema.entity_set_name);
        if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
            url.push_str(&format!("?$filter={}", urlencoding::encode(filter)));
        }
        self.fetch_pages(url, &schema)
            .await
            .with_context(|| format!("Failed to retrieve '{}' from {}", entity, self.environment.name))
    }

    async fn retrieve_records_by_query(&self, entity: &str, fetch_xml: &str) -> Result<RecordSet> {
        let schema = self.get_schema(entity).await?;
        let mut records = RecordSet::new(entity);
        let mut page = 1;
        let mut cookie: Option<String> = None;

        loop {
            let query = with_paging(fetch_xml, page, cookie.as_deref());
            let url = format!(
                "{}/{}?fetchXml={}",
                self.api_url(),
                schema.entity_set_name,
                urlencoding::encode(&query)
            );
            let response = self.get_json(&url).await?;
            for row in page_rows(&response) {
                records.insert(Record::from_json(&schema, row)?);
            }

            let more = response
                .get(MORE_RECORDS)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !more {
                break;
            }
            cookie = response
                .get(PAGING_COOKIE)
                .and_then(Value::as_str)
                .and_then(paging_cookie);
            page += 1;
        }

        Ok(records)
    }

    async fn get_schema(&self, entity: &str) -> Result<EntitySchema> {
        let key = entity.to_lowercase();
        if let Some(schema) = self.schemas.read().await.get(&key) {
            return Ok(schema.clone());
        }

        let schema = self.fetch_schema(entity).await?;
        self.schemas.write().await.insert(key, schema.clone());
        Ok(schema)
    }

    async fn execute_batch(&self, operations: &[Operation], continue_on_error: bool) -> Result<BatchResponse> {
        if operations.is_empty() {
            return Ok(BatchResponse::default());
        }

        let (schemas, failures) = self.schemas_for(referenced_entities(operations)).await;
        let api_url = self.api_url();
        let prepared = prepare_batch(operations, &api_url, &schemas, &failures, continue_on_error);
        if prepared.batch.is_empty() {
            return Ok(BatchResponse::from_results(prepared.rejected));
        }
        let batch = &prepared.batch;

        let mut request = self
            .http
            .post(format!("{}/$batch", api_url))
            .header("Content-Type", batch.content_type())
            .header("OData-MaxVersion", "4.0")
            .header("OData-Version", "4.0")
            .header("Accept", "application/json")
            .body(batch.body());
        if continue_on_error {
            request = request.header("Prefer", "odata.continue-on-error");
        }

        log::debug!(
            "POST $batch to {} ({} operations, {} rejected before sending)",
            self.environment.name,
            batch.len(),
            prepared.rejected.len()
        );
        let response = ensure_success(self.send(request).await?).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.context("Failed to read batch response")?;

        let sent = parse_batch_response(&content_type, &body, batch.len())?;
        Ok(BatchResponse::from_results(prepared.merge(sent)))
    }

    async fn resolve_many_to_many(&self, relationship: &str) -> Result<ManyToManyMetadata> {
        let url = format!(
            "{}/RelationshipDefinitions/Microsoft.Dynamics.CRM.ManyToManyRelationshipMetadata\
             ?$filter=SchemaName eq '{}'\
             &$select=SchemaName,IntersectEntityName,Entity1LogicalName,Entity1IntersectAttribute,Entity2LogicalName,Entity2IntersectAttribute",
            self.api_url(),
            odata_literal(relationship)
        );
        let response = self.get_json(&url).await?;
        parse_many_to_many(&response, relationship)
    }
}

/// Turn a non-success response into an error carrying the OData message
async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or(body);
    anyhow::bail!("HTTP {}: {}", status, message)
}

fn page_rows(page: &Value) -> impl Iterator<Item = &Value> {
    page.get("value")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Escape a value for use inside an OData string literal
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Build an [`EntitySchema`] from EntityDefinitions and lookup target responses
pub fn parse_entity_schema(definition: &Value, lookups: &Value) -> Result<EntitySchema> {
    let text = |key: &str| definition.get(key).and_then(Value::as_str);

    let logical_name = text("LogicalName").context("Entity definition has no LogicalName")?;
    let entity_set_name = text("EntitySetName")
        .with_context(|| format!("Entity '{}' has no EntitySetName", logical_name))?;
    let primary_id = text("PrimaryIdAttribute")
        .with_context(|| format!("Entity '{}' has no PrimaryIdAttribute", logical_name))?;

    let mut targets: HashMap<&str, Vec<String>> = HashMap::new();
    for lookup in page_rows(lookups) {
        if let Some(name) = lookup.get("LogicalName").and_then(Value::as_str) {
            let list: Vec<String> = lookup
                .get("Targets")
                .and_then(Value::as_array)
                .map(|t| t.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            targets.insert(name, list);
        }
    }

    let mut schema = EntitySchema::new(logical_name, entity_set_name, primary_id);
    schema.primary_name_attribute = text("PrimaryNameAttribute").map(str::to_string);

    let attributes = definition
        .get("Attributes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten();
    for attribute in attributes {
        let Some(name) = attribute.get("LogicalName").and_then(Value::as_str) else {
            continue;
        };
        let attribute_type = attribute
            .get("AttributeType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let flag = |key: &str| attribute.get(key).and_then(Value::as_bool).unwrap_or(false);

        schema.fields.push(FieldMetadata {
            logical_name: name.to_string(),
            schema_name: attribute
                .get("SchemaName")
                .and_then(Value::as_str)
                .map(str::to_string),
            field_type: FieldType::from_attribute_type(attribute_type),
            is_valid_for_create: flag("IsValidForCreate"),
            is_valid_for_update: flag("IsValidForUpdate"),
            targets: targets.get(name).cloned().unwrap_or_default(),
        });
    }

    Ok(schema)
}

/// Read the first ManyToManyRelationshipMetadata entry of a response
pub fn parse_many_to_many(response: &Value, relationship: &str) -> Result<ManyToManyMetadata> {
    let entry = page_rows(response)
        .next()
        .with_context(|| format!("Many-to-many relationship '{}' not found", relationship))?;
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("Relationship '{}' has no {}", relationship, key))
    };

    Ok(ManyToManyMetadata {
        schema_name: text("SchemaName")?,
        intersect_entity: text("IntersectEntityName")?,
        entity1: text("Entity1LogicalName")?,
        entity1_key: text("Entity1IntersectAttribute")?,
        entity2: text("Entity2LogicalName")?,
        entity2_key: text("Entity2IntersectAttribute")?,
    })
}

/// Extract the `pagingcookie` attribute from a FetchXML paging annotation
pub fn paging_cookie(annotation: &str) -> Option<String> {
    let start = annotation.find("pagingcookie=\"")? + "pagingcookie=\"".len();
    let end = annotation[start..].find('"')? + start;
    let encoded = &annotation[start..end];
    // The cookie is url-encoded twice
    let once = urlencoding::decode(encoded).ok()?;
    let twice = urlencoding::decode(&once).ok()?;
    Some(twice.into_owned())
}

/// Add `page` and `paging-cookie` attributes to the root fetch element
pub fn with_paging(fetch_xml: &str, page: u32, cookie: Option<&str>) -> String {
    if page <= 1 && cookie.is_none() {
        return fetch_xml.to_string();
    }
    let mut attributes = format!(" page=\"{}\"", page);
    if let Some(cookie) = cookie {
        attributes.push_str(&format!(" paging-cookie=\"{}\"", xml_escape(cookie)));
    }
    match fetch_xml.find("<fetch") {
        Some(pos) => {
            let insert_at = pos + "<fetch".len();
            format!("{}{}{}", &fetch_xml[..insert_at], attributes, &fetch_xml[insert_at..])
        }
        None => fetch_xml.to_string(),
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Entities whose metadata is needed to serialize the operations
fn referenced_entities(operations: &[Operation]) -> BTreeSet<String> {
    let mut entities = BTreeSet::new();
    for operation in operations {
        match operation {
            Operation::Upsert { entity, fields, .. } | Operation::Update { entity, fields, .. } => {
                entities.insert(entity.clone());
                entities.extend(
                    fields
                        .values()
                        .filter_map(AttributeValue::as_reference)
                        .filter(|r| !r.target_type.is_empty())
                        .map(|r| r.target_type.clone()),
                );
            }
            Operation::SetState { entity, .. } => {
                entities.insert(entity.clone());
            }
            Operation::Associate { entity1, entity2, .. } | Operation::Disassociate { entity1, entity2, .. } => {
                entities.insert(entity1.clone());
                entities.insert(entity2.clone());
            }
        }
    }
    entities
}

fn schema_of<'a>(schemas: &'a HashMap<String, EntitySchema>, entity: &str) -> Result<&'a EntitySchema> {
    schemas
        .get(entity)
        .or_else(|| schemas.values().find(|s| s.logical_name.eq_ignore_ascii_case(entity)))
        .with_context(|| format!("No metadata loaded for '{}'", entity))
}

/// JSON body of an upsert or update
pub fn record_payload(
    schema: &EntitySchema,
    fields: &Fields,
    schemas: &HashMap<String, EntitySchema>,
) -> Result<Value> {
    let mut body = Map::new();

    for (name, value) in fields {
        let field = schema.field(name);
        let is_lookup = field.is_some_and(|f| f.field_type.is_reference());

        match value {
            AttributeValue::Reference(reference) => {
                let bind_name = field.map(FieldMetadata::bind_name).unwrap_or(name.as_str());
                let target = if reference.target_type.is_empty() {
                    field
                        .and_then(|f| f.targets.first())
                        .map(String::as_str)
                        .unwrap_or_default()
                } else {
                    reference.target_type.as_str()
                };
                let target_schema = schema_of(schemas, target)?;
                body.insert(
                    format!("{}@odata.bind", bind_name),
                    Value::String(format!(
                        "/{}({})",
                        target_schema.entity_set_name, reference.target_id
                    )),
                );
            }
            AttributeValue::Null if is_lookup => {
                let bind_name = field.map(FieldMetadata::bind_name).unwrap_or(name.as_str());
                body.insert(format!("{}@odata.bind", bind_name), Value::Null);
            }
            other => {
                body.insert(name.clone(), other.to_json());
            }
        }
    }

    Ok(Value::Object(body))
}

/// Parts that could be serialized, plus faults for the ones that could not
#[derive(Debug)]
pub struct PreparedBatch {
    pub batch: BatchRequest,
    /// Position in the original operation list of each part in `batch`
    pub positions: Vec<usize>,
    pub rejected: Vec<OperationResult>,
}

impl PreparedBatch {
    /// Combine the results of the sent parts with the rejected items, indexed
    /// by original position
    pub fn merge(self, sent: Vec<OperationResult>) -> Vec<OperationResult> {
        let mut results: Vec<OperationResult> = sent
            .into_iter()
            .filter_map(|mut result| {
                result.index = *self.positions.get(result.index)?;
                Some(result)
            })
            .chain(self.rejected)
            .collect();
        results.sort_by_key(|r| r.index);
        results
    }
}

/// Serialize each operation on its own; an operation that cannot be built
/// becomes a fault without keeping the others out of the batch
pub fn prepare_batch(
    operations: &[Operation],
    api_url: &str,
    schemas: &HashMap<String, EntitySchema>,
    failures: &HashMap<String, String>,
    continue_on_error: bool,
) -> PreparedBatch {
    let mut prepared = PreparedBatch {
        batch: BatchRequest::new(),
        positions: Vec::new(),
        rejected: Vec::new(),
    };

    for (index, operation) in operations.iter().enumerate() {
        match build_part(operation, api_url, schemas) {
            Ok(part) => {
                prepared.batch.push(part);
                prepared.positions.push(index);
            }
            Err(e) => {
                let cause = referenced_entities(std::slice::from_ref(operation))
                    .into_iter()
                    .find_map(|entity| failures.get(&entity))
                    .map(|message| format!("{:#} ({})", e, message))
                    .unwrap_or_else(|| format!("{:#}", e));
                log::warn!("Cannot build {} for {}: {}", operation.operation_type(), operation.record_id(), cause);
                prepared.rejected.push(OperationResult::error(index, cause, None));
                if !continue_on_error {
                    break;
                }
            }
        }
    }

    prepared
}

/// Translate one operation into a `$batch` part
pub fn build_part(
    operation: &Operation,
    api_url: &str,
    schemas: &HashMap<String, EntitySchema>,
) -> Result<BatchPart> {
    let record_url = |entity: &str, id: &str| -> Result<String> {
        let schema = schema_of(schemas, entity)?;
        Ok(format!("{}/{}({})", api_url, schema.entity_set_name, id))
    };

    let part = match operation {
        Operation::Upsert { entity, id, fields } => BatchPart {
            method: operation.http_method(),
            url: record_url(entity, id)?,
            headers: Vec::new(),
            body: Some(record_payload(schema_of(schemas, entity)?, fields, schemas)?),
        },
        Operation::Update { entity, id, fields } => BatchPart {
            method: operation.http_method(),
            url: record_url(entity, id)?,
            headers: vec![("If-Match".to_string(), "*".to_string())],
            body: Some(record_payload(schema_of(schemas, entity)?, fields, schemas)?),
        },
        Operation::SetState { entity, id, state, status } => BatchPart {
            method: operation.http_method(),
            url: record_url(entity, id)?,
            headers: vec![("If-Match".to_string(), "*".to_string())],
            body: Some(json!({ "statecode": state, "statuscode": status })),
        },
        Operation::Associate { relationship, entity1, id1, entity2, id2 } => BatchPart {
            method: operation.http_method(),
            url: format!("{}/{}/$ref", record_url(entity1, id1)?, relationship),
            headers: Vec::new(),
            body: Some(json!({ "@odata.id": record_url(entity2, id2)? })),
        },
        Operation::Disassociate { relationship, entity1, id1, id2, .. } => BatchPart {
            method: operation.http_method(),
            url: format!("{}/{}({})/$ref", record_url(entity1, id1)?, relationship, id2),
            headers: Vec::new(),
            body: None,
        },
    };

    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::value::EntityReference;

    const API: &str = "https://org.crm4.dynamics.com/api/data/v9.2";

    fn schemas() -> HashMap<String, EntitySchema> {
        let mut parent = FieldMetadata::lookup("nrq_parentid", "nrq_category");
        parent.schema_name = Some("nrq_ParentId".to_string());
        let category = EntitySchema::new("nrq_category", "nrq_categories", "nrq_categoryid")
            .with_field(FieldMetadata::new("nrq_name", FieldType::String))
            .with_field(parent);
        let fund = EntitySchema::new("nrq_fund", "nrq_funds", "nrq_fundid");
        HashMap::from([
            ("nrq_category".to_string(), category),
            ("nrq_fund".to_string(), fund),
        ])
    }

    #[test]
    fn test_parse_entity_schema() {
        let definition = json!({
            "LogicalName": "nrq_category",
            "EntitySetName": "nrq_categories",
            "PrimaryIdAttribute": "nrq_categoryid",
            "PrimaryNameAttribute": "nrq_name",
            "Attributes": [
                {"LogicalName": "nrq_name", "SchemaName": "nrq_Name", "AttributeType": "String",
                 "IsValidForCreate": true, "IsValidForUpdate": true},
                {"LogicalName": "nrq_parentid", "SchemaName": "nrq_ParentId", "AttributeType": "Lookup",
                 "IsValidForCreate": true, "IsValidForUpdate": true},
                {"LogicalName": "versionnumber", "AttributeType": "BigInt",
                 "IsValidForCreate": false, "IsValidForUpdate": false}
            ]
        });
        let lookups = json!({"value": [{"LogicalName": "nrq_parentid", "Targets": ["nrq_category"]}]});

        let schema = parse_entity_schema(&definition, &lookups).unwrap();
        assert_eq!(schema.entity_set_name, "nrq_categories");
        assert_eq!(schema.primary_name_attribute.as_deref(), Some("nrq_name"));
        let parent = schema.field("nrq_parentid").unwrap();
        assert_eq!(parent.field_type, FieldType::Lookup);
        assert_eq!(parent.targets, vec!["nrq_category".to_string()]);
        assert_eq!(parent.bind_name(), "nrq_ParentId");
        assert!(!schema.field("versionnumber").unwrap().is_writable());
    }

    #[test]
    fn test_parse_many_to_many() {
        let response = json!({"value": [{
            "SchemaName": "nrq_category_nrq_fund",
            "IntersectEntityName": "nrq_category_nrq_fund",
            "Entity1LogicalName": "nrq_category",
            "Entity1IntersectAttribute": "nrq_categoryid",
            "Entity2LogicalName": "nrq_fund",
            "Entity2IntersectAttribute": "nrq_fundid"
        }]});
        let metadata = parse_many_to_many(&response, "nrq_category_nrq_fund").unwrap();
        assert_eq!(metadata.entity2_key, "nrq_fundid");

        assert!(parse_many_to_many(&json!({"value": []}), "missing").is_err());
    }

    #[test]
    fn test_reference_is_bound_by_schema_name() {
        let schemas = schemas();
        let mut fields = Fields::new();
        fields.insert(
            "nrq_parentid".to_string(),
            AttributeValue::Reference(EntityReference::new("nrq_category", "abc")),
        );
        fields.insert("nrq_name".to_string(), AttributeValue::String("A".to_string()));

        let body = record_payload(&schemas["nrq_category"], &fields, &schemas).unwrap();
        assert_eq!(body["nrq_ParentId@odata.bind"], json!("/nrq_categories(abc)"));
        assert_eq!(body["nrq_name"], json!("A"));
    }

    #[test]
    fn test_null_reference_clears_lookup() {
        let schemas = schemas();
        let mut fields = Fields::new();
        fields.insert("nrq_parentid".to_string(), AttributeValue::Null);

        let body = record_payload(&schemas["nrq_category"], &fields, &schemas).unwrap();
        assert_eq!(body["nrq_ParentId@odata.bind"], Value::Null);
        assert!(body.get("nrq_parentid").is_none());
    }

    #[test]
    fn test_build_parts() {
        let schemas = schemas();

        let update = build_part(&Operation::update("nrq_category", "1", Fields::new()), API, &schemas).unwrap();
        assert_eq!(update.method, "PATCH");
        assert_eq!(update.url, format!("{}/nrq_categories(1)", API));
        assert!(update.headers.contains(&("If-Match".to_string(), "*".to_string())));

        let upsert = build_part(&Operation::upsert("nrq_category", "1", Fields::new()), API, &schemas).unwrap();
        assert!(upsert.headers.is_empty());

        let state = build_part(&Operation::set_state("nrq_fund", "2", 1, 2), API, &schemas).unwrap();
        assert_eq!(state.body, Some(json!({"statecode": 1, "statuscode": 2})));

        let associate = Operation::Associate {
            relationship: "nrq_category_nrq_fund".to_string(),
            entity1: "nrq_category".to_string(),
            id1: "c".to_string(),
            entity2: "nrq_fund".to_string(),
            id2: "f".to_string(),
        };
        let part = build_part(&associate, API, &schemas).unwrap();
        assert_eq!(part.method, "POST");
        assert_eq!(part.url, format!("{}/nrq_categories(c)/nrq_category_nrq_fund/$ref", API));
        assert_eq!(part.body, Some(json!({"@odata.id": format!("{}/nrq_funds(f)", API)})));

        let disassociate = Operation::Disassociate {
            relationship: "nrq_category_nrq_fund".to_string(),
            entity1: "nrq_category".to_string(),
            id1: "c".to_string(),
            entity2: "nrq_fund".to_string(),
            id2: "f".to_string(),
        };
        let part = build_part(&disassociate, API, &schemas).unwrap();
        assert_eq!(part.method, "DELETE");
        assert_eq!(part.url, format!("{}/nrq_categories(c)/nrq_category_nrq_fund(f)/$ref", API));
        assert!(part.body.is_none());
    }

    fn named(name: &str) -> Fields {
        Fields::from([("nrq_name".to_string(), AttributeValue::String(name.to_string()))])
    }

    #[test]
    fn test_unbuildable_item_does_not_block_batch() {
        let schemas = schemas();
        let mut orphan = Fields::new();
        orphan.insert(
            "nrq_ownerref".to_string(),
            AttributeValue::Reference(EntityReference::new("", "x")),
        );
        let operations = [
            Operation::update("nrq_category", "1", named("ok")),
            Operation::update("nrq_category", "2", orphan),
            Operation::update("nrq_category", "3", named("also ok")),
        ];

        let prepared = prepare_batch(&operations, API, &schemas, &HashMap::new(), true);
        assert_eq!(prepared.batch.len(), 2);
        assert_eq!(prepared.positions, vec![0, 2]);
        assert_eq!(prepared.rejected.len(), 1);
        assert_eq!(prepared.rejected[0].index, 1);

        // Response indices refer to sent parts and map back to the originals
        let results = prepared.merge(vec![
            OperationResult::success(0, Some(204)),
            OperationResult::error(1, "Duplicate", Some(412)),
        ]);
        let summary: Vec<(usize, bool)> = results.iter().map(|r| (r.index, r.success)).collect();
        assert_eq!(summary, vec![(0, true), (1, false), (2, false)]);
        assert_eq!(results[2].error.as_deref(), Some("Duplicate"));
    }

    #[test]
    fn test_missing_target_schema_faults_only_its_items() {
        let mut schemas = schemas();
        schemas.remove("nrq_fund");
        let failures = HashMap::from([("nrq_fund".to_string(), "HTTP 403".to_string())]);

        let mut fund_ref = Fields::new();
        fund_ref.insert(
            "nrq_parentid".to_string(),
            AttributeValue::Reference(EntityReference::new("nrq_fund", "f")),
        );
        let operations = [
            Operation::update("nrq_category", "1", fund_ref),
            Operation::update("nrq_category", "2", named("ok")),
        ];

        let prepared = prepare_batch(&operations, API, &schemas, &failures, true);
        assert_eq!(prepared.positions, vec![1]);
        assert_eq!(prepared.rejected[0].index, 0);
        assert!(prepared.rejected[0].error.as_deref().unwrap().contains("HTTP 403"));
    }

    #[test]
    fn test_stop_at_first_unbuildable_item() {
        let operations = [
            Operation::update("nrq_category", "1", named("ok")),
            Operation::set_state("account", "2", 1, 2),
            Operation::update("nrq_category", "3", named("ok")),
        ];
        let prepared = prepare_batch(&operations, API, &schemas(), &HashMap::new(), false);
        assert_eq!(prepared.positions, vec![0]);
        assert_eq!(prepared.rejected.len(), 1);
    }

    #[tokio::test]
    async fn test_fully_rejected_batch_is_not_sent() {
        let client = DynamicsClient::new(Environment {
            name: "dev".to_string(),
            url: "https://dev.crm4.dynamics.com".to_string(),
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        });
        *client.schemas.write().await = schemas();

        let mut orphan = Fields::new();
        orphan.insert(
            "nrq_ownerref".to_string(),
            AttributeValue::Reference(EntityReference::new("", "x")),
        );
        let response = client
            .execute_batch(&[Operation::update("nrq_category", "1", orphan)], true)
            .await
            .unwrap();
        assert_eq!(response.fault_count(), 1);
        assert!(response.faulted);
    }

    #[test]
    fn test_unknown_entity_fails() {
        let result = build_part(&Operation::set_state("account", "1", 1, 2), API, &schemas());
        assert!(result.is_err());
    }

    #[test]
    fn test_referenced_entities() {
        let mut fields = Fields::new();
        fields.insert(
            "nrq_parentid".to_string(),
            AttributeValue::Reference(EntityReference::new("nrq_category", "x")),
        );
        let entities = referenced_entities(&[
            Operation::update("nrq_fund", "1", fields),
            Operation::set_state("account", "2", 1, 2),
        ]);
        assert_eq!(
            entities.into_iter().collect::<Vec<_>>(),
            vec!["account", "nrq_category", "nrq_fund"]
        );
    }

    #[test]
    fn test_fetch_xml_paging() {
        let annotation = r#"<cookie pagenumber="2" pagingcookie="%253ccookie%2520page%253d%25221%2522%253e%253c%252fcookie%253e" istracking="False" />"#;
        let cookie = paging_cookie(annotation).unwrap();
        assert_eq!(cookie, r#"<cookie page="1"></cookie>"#);

        let fetch = r#"<fetch mapping="logical"><entity name="x" /></fetch>"#;
        assert_eq!(with_paging(fetch, 1, None), fetch);
        let paged = with_paging(fetch, 2, Some(&cookie));
        assert!(paged.starts_with(r#"<fetch page="2" paging-cookie="&lt;cookie page=&quot;1&quot;&gt;&lt;/cookie&gt;" mapping="logical">"#));
    }
}
