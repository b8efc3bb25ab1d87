//! Pulls `Document`s out of raw API records.
//!
//! Records nest their fields at varying depths, so fields are located by a
//! depth-first key search instead of fixed paths. The block id and the body
//! summary live under `blocks.body`; the rest can sit anywhere in the record.

use pressdex_core::Document;
use serde_json::Value;

use crate::error::ExtractError;

pub fn extract_document(record: &Value) -> Result<Document, ExtractError> {
    let body = record.pointer("/blocks/body").ok_or(ExtractError::MissingField("blocks.body"))?;
    Ok(Document {
        external_id: required(body, "id")?,
        url: required(record, "webUrl")?,
        title: required(record, "webTitle")?,
        section: required(record, "sectionName")?,
        body_text: required(body, "bodyTextSummary")?,
    })
}

/// Extracts every usable record on a page, logging and dropping the rest.
pub fn extract_page(page: u32, results: &[Value]) -> Vec<Document> {
    let mut docs = Vec::with_capacity(results.len());
    for (position, record) in results.iter().enumerate() {
        match extract_document(record) {
            Ok(doc) => docs.push(doc),
            Err(e) => tracing::warn!(page, position, error = %e, "record dropped"),
        }
    }
    docs
}

fn required(value: &Value, key: &'static str) -> Result<String, ExtractError> {
    find_key(value, key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ExtractError::MissingField(key))
}

/// First value stored under `key`, searching objects and arrays depth first.
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|child| find_key(child, key))),
        Value::Array(items) => items.iter().find_map(|child| find_key(child, key)),
        _ => None,
    }
}
