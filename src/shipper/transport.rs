use crate::buffer::Batch;
use crate::config::types::{Encoding, ShipperConfig};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;

pub const BATCH_ID_HEADER: &str = "X-Logferry-Batch-Id";
pub const SOURCE_HEADER: &str = "X-Logferry-Source";
pub const AGENT_HEADER: &str = "X-Logferry-Agent";

/// Why a delivery attempt failed, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShipError {
    /// Worth retrying: timeouts, connection errors, 408, 429, 5xx
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The endpoint will never accept this batch
    #[error("batch rejected: {0}")]
    Permanent(String),
}

/// Delivers one batch to the downstream endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &Batch) -> Result<(), ShipError>;
}

/// Body bytes and content type for a batch
pub fn encode_batch(
    batch: &Batch,
    encoding: Encoding,
) -> Result<(Vec<u8>, &'static str), serde_json::Error> {
    match encoding {
        Encoding::Ndjson => {
            let mut body = Vec::new();
            for event in &batch.events {
                serde_json::to_writer(&mut body, event)?;
                body.push(b'\n');
            }
            Ok((body, "application/x-ndjson"))
        }
        Encoding::Json => Ok((serde_json::to_vec(&batch.events)?, "application/json")),
    }
}

/// Map a response status to a delivery result
pub fn classify_status(status: StatusCode) -> Result<(), ShipError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("endpoint returned {}", status);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Err(ShipError::Transient(message))
    } else {
        Err(ShipError::Permanent(message))
    }
}

fn classify_error(error: reqwest::Error) -> ShipError {
    if error.is_builder() {
        ShipError::Permanent(error.to_string())
    } else {
        ShipError::Transient(error.to_string())
    }
}

/// POSTs batches to an HTTP(S) endpoint
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    encoding: Encoding,
    agent_id: String,
}

impl HttpTransport {
    pub fn new(config: &ShipperConfig, agent_id: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            encoding: config.encoding,
            agent_id,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> Result<(), ShipError> {
        let (body, content_type) = encode_batch(batch, self.encoding)
            .map_err(|e| ShipError::Permanent(format!("failed to encode batch: {}", e)))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, content_type)
            .header(BATCH_ID_HEADER, batch.batch_id.to_string())
            .header(SOURCE_HEADER, batch.source_id.as_str())
            .header(AGENT_HEADER, self.agent_id.as_str())
            .body(body);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(classify_error)?;
        let status = response.status();
        classify_status(status).map_err(|e| {
            tracing::debug!(
                batch_id = %batch.batch_id,
                status = status.as_u16(),
                "Endpoint did not accept batch"
            );
            e
        })
    }
}
