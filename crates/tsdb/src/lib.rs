// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for an OpenTSDB-compatible HTTP API.
//!
//! - [`query`] and [`wire`] build `/api/query` requests in URL and JSON form.
//! - [`api`] performs the HTTP exchanges.
//! - [`client::HttpClient`] adds a bounded queue drained by a background
//!   [`writer`] that batches data points into `/api/put` calls.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod api;
pub mod client;
pub mod config;
pub mod constants;
pub mod datapoint;
pub mod errors;
pub mod http;
pub mod query;
pub mod span;
pub mod tag;
pub mod wire;
pub mod writer;

pub use api::{QueryResult, TsdbApi};
pub use client::{HttpClient, PointSink};
pub use config::{Conf, HttpConf};
pub use datapoint::DataPoint;
pub use errors::TsdbError;
pub use query::{Downsampler, Filter, Query, QueryRequest, RateOptions, RelativeTime, Window};
pub use span::{Span, SpanProvider, TracingSpanProvider};
pub use tag::{make_tags, Tag, Tags};
pub use writer::{BatchSink, FlushFailure, Writer, WriterConfig};
