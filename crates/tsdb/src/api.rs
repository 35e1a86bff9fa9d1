// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Synchronous calls against the TSDB HTTP API: queries and batch writes.

use crate::config::Conf;
use crate::constants::{PUT_ENDPOINT, QUERY_ENDPOINT, UNKNOWN_ERROR};
use crate::datapoint::DataPoint;
use crate::errors::TsdbError;
use crate::http::build_client;
use crate::query::QueryRequest;
use crate::span::SpanProvider;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::io::{Read, Write};
use std::time::Instant;
use tracing::debug;

/// One series returned by a query. The schema belongs to the backend and is
/// passed through untouched.
pub type QueryResult = serde_json::Value;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TsdbApi {
    client: reqwest::Client,
    base_url: String,
}

impl TsdbApi {
    pub fn new(config: &Conf) -> Result<Self, TsdbError> {
        Ok(Self::with_client(build_client(&config.http)?, config.base_url()))
    }

    /// Uses an already configured client; `base_url` ends with `/api`.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Runs a query through `GET /api/query`.
    ///
    /// When `spans` is given, the HTTP exchange is wrapped in an exit-call
    /// span that is closed before the body is decoded.
    pub async fn query_get(
        &self,
        request: &QueryRequest,
        spans: Option<&dyn SpanProvider>,
    ) -> Result<Vec<QueryResult>, TsdbError> {
        let params = request.parameterize()?;
        let url = Url::parse_with_params(&self.endpoint(QUERY_ENDPOINT), &params)
            .map_err(|e| TsdbError::RequestBuild(format!("Failed to generate request: {e}")))?;
        debug!("GET url: {url}");

        let span = spans.map(|provider| provider.enter_span("tsdb", url.as_str()));
        let response = match self
            .client
            .get(url)
            .header(ACCEPT_ENCODING, "gzip")
            .send()
            .await
        {
            Ok(response) => {
                if let Some(span) = span {
                    span.end();
                }
                response
            }
            Err(e) => {
                let error = TsdbError::Transport(e);
                if let Some(span) = span {
                    span.end_with_error(&error);
                }
                return Err(error);
            }
        };

        let result = decode_query_response(response).await;
        if let (Err(error), Some(provider)) = (&result, spans) {
            provider.record_error(error);
        }
        result
    }

    /// Runs a query through `POST /api/query` with a JSON body.
    pub async fn query_post(&self, request: &QueryRequest) -> Result<Vec<QueryResult>, TsdbError> {
        let body = request.to_json()?;
        let response = self
            .client
            .post(self.endpoint(QUERY_ENDPOINT))
            .header(ACCEPT_ENCODING, "gzip")
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        decode_query_response(response).await
    }

    /// Writes a batch through `POST /api/put` as gzip-compressed JSON.
    pub async fn put_many(&self, points: &[DataPoint]) -> Result<(), TsdbError> {
        let body = encode_batch(points)?;
        let len = body.len();
        let start = Instant::now();

        let response = self
            .client
            .post(self.endpoint(PUT_ENDPOINT))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(body)
            .send()
            .await?;
        debug!("{len} bytes in {:?}", start.elapsed());

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let bytes = response.bytes().await?;
        let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
            TsdbError::Decode(format!("status {} with unreadable body: {e}", status.as_u16()))
        })?;
        match envelope.error {
            Some(body) => Err(TsdbError::Remote(
                body.message.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            )),
            None if status.is_success() => Ok(()),
            None => Err(TsdbError::Remote(UNKNOWN_ERROR.to_string())),
        }
    }
}

async fn decode_query_response(
    response: reqwest::Response,
) -> Result<Vec<QueryResult>, TsdbError> {
    let status = response.status();
    let body = response.bytes().await?;
    let body = inflate(&body)?;

    // got nothing back, that's fine
    if body.is_empty() {
        return Ok(Vec::new());
    }

    if status != StatusCode::OK {
        let envelope: ErrorEnvelope = serde_json::from_slice(&body)
            .map_err(|e| TsdbError::Decode(format!("Failed to decode: {e}")))?;
        let message = envelope
            .error
            .and_then(|error| error.message)
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
        return Err(TsdbError::QueryStatus {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| TsdbError::Decode(format!("Failed to unmarshal: {e}")))
}

/// Serializes a batch as JSON and gzips it.
pub fn encode_batch(points: &[DataPoint]) -> Result<Vec<u8>, TsdbError> {
    let json = serde_json::to_vec(points).map_err(|e| TsdbError::RequestBuild(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| TsdbError::RequestBuild(format!("Failed to compress batch: {e}")))?;
    encoder
        .finish()
        .map_err(|e| TsdbError::RequestBuild(format!("Failed to compress batch: {e}")))
}

/// Inflates a gzip body; anything without the gzip magic is returned as is.
fn inflate(body: &[u8]) -> Result<Vec<u8>, TsdbError> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Ok(body.to_vec());
    }
    let mut decoder = GzDecoder::new(body);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| TsdbError::Decode(format!("Failed to read gzip: {e}")))?;
    Ok(decompressed)
}
