//! Elasticsearch bulk client

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use super::{BulkResponse, ElasticConfig, IndexClient, IndexClientError, ItemFailure};
use crate::models::IndexableDocument;

/// Index client writing through the Elasticsearch `_bulk` API
#[derive(Debug)]
pub struct ElasticClient {
    client: reqwest::Client,
    addresses: Vec<String>,
    next_address: AtomicUsize,
    index_name: String,
    username: String,
    password: String,
}

impl ElasticClient {
    pub fn new(config: &ElasticConfig) -> Result<Self, IndexClientError> {
        let addresses = config.addresses_list();
        if addresses.is_empty() {
            return Err(IndexClientError::Setup(
                "no Elasticsearch address configured".to_string(),
            ));
        }

        let mut builder = reqwest::Client::builder().timeout(config.request_timeout());
        if let Some(path) = &config.ca_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                IndexClientError::Setup(format!("reading CA certificate {}: {}", path, e))
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        info!(
            addresses = ?addresses,
            index = %config.index_name,
            "Elasticsearch client configured"
        );

        Ok(Self {
            client: builder.build()?,
            addresses,
            next_address: AtomicUsize::new(0),
            index_name: config.index_name.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Bulk endpoint of the next address, round-robin
    fn bulk_url(&self) -> String {
        let n = self.next_address.fetch_add(1, Ordering::Relaxed);
        let address = &self.addresses[n % self.addresses.len()];
        format!("{}/{}/_bulk", address, self.index_name)
    }
}

#[async_trait]
impl IndexClient for ElasticClient {
    async fn bulk_upsert(
        &self,
        documents: &[IndexableDocument],
    ) -> Result<BulkResponse, IndexClientError> {
        if documents.is_empty() {
            return Ok(BulkResponse::default());
        }

        let body = encode_bulk_body(documents)?;
        let bytes = body.len() as u64;
        let url = self.bulk_url();

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IndexClientError::Response {
                status: status.as_u16(),
                message,
            });
        }

        let raw = response.bytes().await?;
        let failures = decode_bulk_response(&raw, documents)?;
        debug!(
            url = %url,
            documents = documents.len(),
            bytes,
            failed = failures.len(),
            "Bulk request completed"
        );

        Ok(BulkResponse { failures, bytes })
    }
}

/// Build the NDJSON body of a bulk request
///
/// Payloads are valid JSON, so line breaks in them can only be whitespace
/// between tokens and are flattened to spaces.
pub fn encode_bulk_body(documents: &[IndexableDocument]) -> Result<Vec<u8>, IndexClientError> {
    let size: usize = documents.iter().map(|d| d.payload.len() + 96).sum();
    let mut body = Vec::with_capacity(size);

    for document in documents {
        write_bulk_item(&mut body, document)?;
    }

    Ok(body)
}

/// Write the action line and source line of one document
fn write_bulk_item<W: Write>(
    out: &mut W,
    document: &IndexableDocument,
) -> Result<(), IndexClientError> {
    let action = json!({
        "index": {
            "_id": document.id.as_str(),
            "require_alias": true,
        }
    });
    serde_json::to_writer(&mut *out, &action)
        .map_err(|e| IndexClientError::Encode(format!("bulk action: {}", e)))?;

    let source: Vec<u8> = document
        .payload
        .iter()
        .map(|&b| match b {
            b'\n' | b'\r' => b' ',
            other => other,
        })
        .collect();
    let mut write_source = || -> std::io::Result<()> {
        out.write_all(b"\n")?;
        out.write_all(&source)?;
        out.write_all(b"\n")
    };
    write_source().map_err(|e| IndexClientError::Encode(format!("bulk source: {}", e)))
}

#[derive(Debug, Deserialize)]
struct BulkApiResponse {
    errors: bool,
    items: Vec<HashMap<String, BulkApiItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkApiItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<BulkApiItemError>,
}

#[derive(Debug, Deserialize)]
struct BulkApiItemError {
    #[serde(rename = "type")]
    kind: String,
    reason: Option<String>,
}

/// Extract the rejected items of a bulk response
///
/// Items come back in request order; an item failed when its status is
/// above 201.
pub fn decode_bulk_response(
    raw: &[u8],
    documents: &[IndexableDocument],
) -> Result<Vec<ItemFailure>, IndexClientError> {
    let response: BulkApiResponse =
        serde_json::from_slice(raw).map_err(|e| IndexClientError::Decode(e.to_string()))?;

    if response.items.len() != documents.len() {
        return Err(IndexClientError::Decode(format!(
            "expected {} items, got {}",
            documents.len(),
            response.items.len()
        )));
    }
    if !response.errors {
        return Ok(Vec::new());
    }

    let mut failures = Vec::new();
    for (position, item) in response.items.into_iter().enumerate() {
        let Some(result) = item.into_values().next() else {
            continue;
        };
        if result.status <= 201 {
            continue;
        }

        let reason = match result.error {
            Some(error) => format!(
                "{}: {}",
                error.kind,
                error.reason.unwrap_or_default()
            ),
            None => format!("status {}", result.status),
        };
        failures.push(ItemFailure {
            position,
            id: result
                .id
                .unwrap_or_else(|| documents[position].id.to_string()),
            reason,
        });
    }

    Ok(failures)
}
