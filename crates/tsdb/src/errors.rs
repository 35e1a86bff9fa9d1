// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the TSDB client.
///
/// Synchronous calls (queries, batch writes) return these to the caller. The
/// background writer only logs them, or hands them to a flush observer.
#[derive(Debug, thiserror::Error)]
pub enum TsdbError {
    /// A tag key or value contained a space.
    #[error("{0}")]
    Validation(String),

    /// The request could not be encoded (unresolvable window, serialization failure).
    #[error("Failed to make query: {0}")]
    RequestBuild(String),

    /// Connection, IO or timeout failure while talking to the backend.
    #[error("Failed to do request: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not valid gzip or JSON.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A query was answered with a non-success status.
    #[error("status {status} ({message})")]
    QueryStatus { status: u16, message: String },

    /// A batch write was rejected; the text is the backend's own message.
    #[error("{0}")]
    Remote(String),

    /// The client was used before it could be initialised.
    #[error("Client not ready: {0}")]
    Precondition(String),

    /// Configuration is missing or malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
