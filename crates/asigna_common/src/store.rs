//! Feature-store boundary: the operations the engine consumes, a REST
//! implementation against ArcGIS-style feature services, and an in-memory
//! fake for tests.
//!
//! Session/token acquisition is the caller's problem; the engine only ever
//! sees a ready [`Session`]. All remote calls are synchronous round trips
//! bounded by the client timeout.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::record::AttributeRecord;

// ============================================================================
// Filter expressions
// ============================================================================

/// Boolean filter over field equality and conjunction. Renders to a SQL
/// where-clause for the REST backend and evaluates structurally in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        match filters.len() {
            0 => Filter::All,
            1 => filters.into_iter().next().unwrap_or(Filter::All),
            _ => Filter::And(filters),
        }
    }

    pub fn to_where_clause(&self) -> String {
        match self {
            Filter::All => "1=1".to_string(),
            Filter::Eq(field, value) => match value {
                Value::String(s) => format!("{field} = '{}'", s.replace('\'', "''")),
                other => format!("{field} = {other}"),
            },
            Filter::And(filters) => filters
                .iter()
                .map(|f| f.to_where_clause())
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    /// Structural evaluation against one record (in-memory backend).
    pub fn matches(&self, record: &AttributeRecord) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) => record
                .attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(field))
                .map(|(_, v)| v == expected)
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Reference to one remote dataset (a feature layer or table URL, or a
/// logical key for the in-memory backend).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef(pub String);

impl DatasetRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-item result of a batched add/update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default, rename = "objectId")]
    pub object_id: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of one `apply_edits` call. Per-item, not all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct EditResponse {
    pub add_results: Vec<EditResult>,
    pub update_results: Vec<EditResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub id: i64,
    pub name: String,
}

/// The operations the assignment engine consumes from its data store.
pub trait FeatureStore {
    fn query(
        &self,
        dataset: &DatasetRef,
        filter: &Filter,
        want_geometry: bool,
    ) -> Result<Vec<AttributeRecord>, StoreError>;

    fn apply_edits(
        &self,
        dataset: &DatasetRef,
        adds: &[AttributeRecord],
        updates: &[AttributeRecord],
    ) -> Result<EditResponse, StoreError>;

    fn list_attachments(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
    ) -> Result<Vec<AttachmentInfo>, StoreError>;

    fn download_attachment(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
        attachment_id: i64,
    ) -> Result<Vec<u8>, StoreError>;

    fn add_attachment(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// REST implementation
// ============================================================================

/// An authenticated portal session, created and torn down by the caller.
#[derive(Debug, Clone)]
pub struct Session {
    pub portal_url: String,
    pub token: String,
}

impl Session {
    pub fn new(portal_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into(),
            token: token.into(),
        }
    }
}

/// Blocking REST client for feature-service endpoints.
pub struct RestFeatureStore {
    session: Session,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl RestFeatureStore {
    pub fn new(session: Session, timeout_secs: u64) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StoreError::Http(format!("failed to build client: {e}")))?;
        Ok(Self {
            session,
            client,
            timeout_secs,
        })
    }

    fn send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.timeout_secs)
        } else {
            StoreError::Http(format!("request failed: {e}"))
        }
    }

    fn check_service_error(
        dataset: &DatasetRef,
        body: &Value,
    ) -> Result<(), StoreError> {
        if let Some(err) = body.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown service error")
                .to_string();
            return Err(StoreError::Rejected {
                dataset: dataset.to_string(),
                message,
            });
        }
        Ok(())
    }

    fn post_form(
        &self,
        dataset: &DatasetRef,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<Value, StoreError> {
        let url = format!("{}/{path}", dataset.0.trim_end_matches('/'));
        let mut params: Vec<(&str, String)> = vec![
            ("f", "json".to_string()),
            ("token", self.session.token.clone()),
        ];
        params.extend(form.iter().cloned());

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            return Err(StoreError::Http(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .map_err(|e| StoreError::InvalidResponse(format!("{url}: {e}")))?;
        Self::check_service_error(dataset, &body)?;
        Ok(body)
    }
}

fn parse_edit_results(body: &Value, key: &str) -> Vec<EditResult> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| EditResult {
                    success: item.get("success").and_then(Value::as_bool).unwrap_or(false),
                    object_id: item.get("objectId").and_then(Value::as_i64),
                    error: item
                        .get("error")
                        .and_then(|e| e.get("description"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

impl FeatureStore for RestFeatureStore {
    fn query(
        &self,
        dataset: &DatasetRef,
        filter: &Filter,
        want_geometry: bool,
    ) -> Result<Vec<AttributeRecord>, StoreError> {
        let body = self.post_form(
            dataset,
            "query",
            &[
                ("where", filter.to_where_clause()),
                ("outFields", "*".to_string()),
                ("returnGeometry", want_geometry.to_string()),
            ],
        )?;
        let features = body
            .get("features")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(features)
            .map_err(|e| StoreError::InvalidResponse(format!("bad feature list: {e}")))
    }

    fn apply_edits(
        &self,
        dataset: &DatasetRef,
        adds: &[AttributeRecord],
        updates: &[AttributeRecord],
    ) -> Result<EditResponse, StoreError> {
        let encode = |records: &[AttributeRecord]| -> Result<String, StoreError> {
            serde_json::to_string(records)
                .map_err(|e| StoreError::InvalidResponse(format!("unencodable batch: {e}")))
        };
        let body = self.post_form(
            dataset,
            "applyEdits",
            &[("adds", encode(adds)?), ("updates", encode(updates)?)],
        )?;
        Ok(EditResponse {
            add_results: parse_edit_results(&body, "addResults"),
            update_results: parse_edit_results(&body, "updateResults"),
        })
    }

    fn list_attachments(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
    ) -> Result<Vec<AttachmentInfo>, StoreError> {
        let body = self.post_form(dataset, &format!("{record_id}/attachments"), &[])?;
        let infos = body
            .get("attachmentInfos")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(infos)
            .map_err(|e| StoreError::InvalidResponse(format!("bad attachment list: {e}")))
    }

    fn download_attachment(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
        attachment_id: i64,
    ) -> Result<Vec<u8>, StoreError> {
        let url = format!(
            "{}/{record_id}/attachments/{attachment_id}",
            dataset.0.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .query(&[("token", self.session.token.as_str())])
            .send()
            .map_err(|e| self.send_error(e))?;
        if !response.status().is_success() {
            return Err(StoreError::Http(format!(
                "{url} returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response.bytes().map_err(|e| self.send_error(e))?;
        Ok(bytes.to_vec())
    }

    fn add_attachment(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/{record_id}/addAttachment",
            dataset.0.trim_end_matches('/')
        );
        let part = reqwest::blocking::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::blocking::multipart::Form::new()
            .text("f", "json")
            .text("token", self.session.token.clone())
            .part("attachment", part);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| self.send_error(e))?;
        let body: Value = response
            .json()
            .map_err(|e| StoreError::InvalidResponse(format!("{url}: {e}")))?;
        Self::check_service_error(dataset, &body)?;
        let success = body
            .pointer("/addAttachmentResult/success")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if success {
            Ok(())
        } else {
            Err(StoreError::Rejected {
                dataset: dataset.to_string(),
                message: format!("attachment '{name}' was not accepted"),
            })
        }
    }
}

// ============================================================================
// In-memory implementation (tests, dry runs)
// ============================================================================

/// One recorded `apply_edits` call, in arrival order.
#[derive(Debug, Clone)]
pub struct RecordedEdit {
    pub dataset: DatasetRef,
    pub adds: Vec<AttributeRecord>,
    pub updates: Vec<AttributeRecord>,
}

#[derive(Default)]
struct MemoryInner {
    datasets: HashMap<DatasetRef, Vec<AttributeRecord>>,
    attachments: HashMap<(DatasetRef, i64), Vec<(AttachmentInfo, Vec<u8>)>>,
    edits: Vec<RecordedEdit>,
    fail_edits: Vec<DatasetRef>,
    next_object_id: i64,
}

/// Deterministic in-memory store. Records every edit batch it receives so
/// tests can assert on batch contents and ordering.
#[derive(Default)]
pub struct MemoryFeatureStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                next_object_id: 1000,
                ..MemoryInner::default()
            }),
        }
    }

    pub fn insert(&self, dataset: &DatasetRef, record: AttributeRecord) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.datasets.entry(dataset.clone()).or_default().push(record);
    }

    pub fn insert_attachment(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
        info: AttachmentInfo,
        bytes: Vec<u8>,
    ) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner
            .attachments
            .entry((dataset.clone(), record_id))
            .or_default()
            .push((info, bytes));
    }

    /// Make every `apply_edits` against `dataset` fail with a store error.
    pub fn fail_edits_on(&self, dataset: &DatasetRef) {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        inner.fail_edits.push(dataset.clone());
    }

    /// Edit batches received so far, in call order.
    pub fn recorded_edits(&self) -> Vec<RecordedEdit> {
        self.inner.lock().expect("memory store poisoned").edits.clone()
    }

    /// Attachments currently stored for one record.
    pub fn attachments_for(&self, dataset: &DatasetRef, record_id: i64) -> Vec<AttachmentInfo> {
        let inner = self.inner.lock().expect("memory store poisoned");
        inner
            .attachments
            .get(&(dataset.clone(), record_id))
            .map(|items| items.iter().map(|(info, _)| info.clone()).collect())
            .unwrap_or_default()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn query(
        &self,
        dataset: &DatasetRef,
        filter: &Filter,
        _want_geometry: bool,
    ) -> Result<Vec<AttributeRecord>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        Ok(inner
            .datasets
            .get(dataset)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn apply_edits(
        &self,
        dataset: &DatasetRef,
        adds: &[AttributeRecord],
        updates: &[AttributeRecord],
    ) -> Result<EditResponse, StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        if inner.fail_edits.contains(dataset) {
            return Err(StoreError::Rejected {
                dataset: dataset.to_string(),
                message: "injected edit failure".to_string(),
            });
        }
        inner.edits.push(RecordedEdit {
            dataset: dataset.clone(),
            adds: adds.to_vec(),
            updates: updates.to_vec(),
        });

        let mut add_results = Vec::with_capacity(adds.len());
        for add in adds {
            let object_id = inner.next_object_id;
            inner.next_object_id += 1;
            let mut stored = add.clone();
            stored.set("objectid", serde_json::json!(object_id));
            inner.datasets.entry(dataset.clone()).or_default().push(stored);
            add_results.push(EditResult {
                success: true,
                object_id: Some(object_id),
                error: None,
            });
        }
        let update_results = updates
            .iter()
            .map(|_| EditResult {
                success: true,
                object_id: None,
                error: None,
            })
            .collect();
        Ok(EditResponse {
            add_results,
            update_results,
        })
    }

    fn list_attachments(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
    ) -> Result<Vec<AttachmentInfo>, StoreError> {
        Ok(self.attachments_for(dataset, record_id))
    }

    fn download_attachment(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
        attachment_id: i64,
    ) -> Result<Vec<u8>, StoreError> {
        let inner = self.inner.lock().expect("memory store poisoned");
        inner
            .attachments
            .get(&(dataset.clone(), record_id))
            .and_then(|items| {
                items
                    .iter()
                    .find(|(info, _)| info.id == attachment_id)
                    .map(|(_, bytes)| bytes.clone())
            })
            .ok_or_else(|| StoreError::Rejected {
                dataset: dataset.to_string(),
                message: format!("attachment {attachment_id} not found on record {record_id}"),
            })
    }

    fn add_attachment(
        &self,
        dataset: &DatasetRef,
        record_id: i64,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("memory store poisoned");
        let slot = inner
            .attachments
            .entry((dataset.clone(), record_id))
            .or_default();
        let id = slot.len() as i64 + 1;
        slot.push((
            AttachmentInfo {
                id,
                name: name.to_string(),
            },
            bytes,
        ));
        Ok(())
    }
}
