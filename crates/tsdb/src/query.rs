// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured queries and their query-string encoding.
//!
//! Each [`Query`] becomes one `m` parameter made of colon separated tokens,
//! in this order: aggregator, downsampler, rate, then `metric{tags}`.
//!
//! ```
//! use std::collections::BTreeMap;
//! use tsdb::query::{Query, QueryRequest, RelativeTime, Window};
//!
//! let query = Query {
//!     metric: "sys.cpu".to_string(),
//!     aggregation_function: "sum".to_string(),
//!     tags: BTreeMap::from([("host".to_string(), vec!["a".to_string(), "b".to_string()])]),
//!     ..Default::default()
//! };
//! assert_eq!(query.m_token(), "sum:sys.cpu{host=a|b}");
//!
//! let request = QueryRequest {
//!     window: Window::since(RelativeTime::new(1, "h")),
//!     queries: vec![query],
//!     ..Default::default()
//! };
//! let params = request.parameterize().unwrap();
//! assert_eq!(params[0], ("start", "1h-ago".to_string()));
//! ```

use crate::errors::TsdbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeTime {
    pub count: i64,
    pub units: String,
}

impl RelativeTime {
    pub fn new(count: i64, units: impl Into<String>) -> Self {
        Self {
            count,
            units: units.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.count == 0
    }
}

impl fmt::Display for RelativeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}-ago", self.count, self.units)
    }
}

/// Time range of a query. Relative bounds win over absolute ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub absolute_start: i64,
    pub absolute_end: i64,
    pub relative_start: RelativeTime,
    pub relative_end: RelativeTime,
}

impl Window {
    pub fn since(start: RelativeTime) -> Self {
        Self {
            relative_start: start,
            ..Default::default()
        }
    }

    pub fn absolute(start: i64, end: Option<i64>) -> Self {
        Self {
            absolute_start: start,
            absolute_end: end.unwrap_or_default(),
            ..Default::default()
        }
    }

    pub fn get_start(&self) -> Result<String, TsdbError> {
        if !self.relative_start.is_null() {
            return Ok(self.relative_start.to_string());
        }
        if self.absolute_start <= 0 {
            return Err(TsdbError::RequestBuild(
                "window has neither a relative nor an absolute start".to_string(),
            ));
        }
        Ok(self.absolute_start.to_string())
    }

    /// `None` means the window is open-ended.
    pub fn get_end(&self) -> Option<String> {
        if !self.relative_end.is_null() {
            return Some(self.relative_end.to_string());
        }
        if self.absolute_end == 0 {
            return None;
        }
        Some(self.absolute_end.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Downsampler {
    #[serde(rename = "rollup")]
    pub relative_time: RelativeTime,
    pub aggregation_function: String,
}

impl Downsampler {
    pub fn new(relative_time: RelativeTime, aggregation_function: impl Into<String>) -> Self {
        Self {
            relative_time,
            aggregation_function: aggregation_function.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.relative_time.is_null()
    }
}

impl fmt::Display for Downsampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}-{}",
            self.relative_time.count, self.relative_time.units, self.aggregation_function
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOptions {
    pub counter: bool,
    pub counter_max: i64,
    pub reset_value: i64,
}

impl RateOptions {
    /// True when the options carry a counter max or a reset value; otherwise
    /// they encode as `dropcounter`.
    pub fn is_counter(&self) -> bool {
        self.counter_max != 0 || self.reset_value != 0
    }

    /// Bracketed suffix of the rate token, e.g. `{counter,100}`.
    fn spec(&self) -> String {
        if !self.is_counter() {
            return "{dropcounter}".to_string();
        }
        let mut spec = String::from("{counter,");
        if self.counter_max != 0 {
            spec.push_str(&self.counter_max.to_string());
        }
        if self.reset_value != 0 {
            // default counter max with a reset value yields "counter,,1234"
            spec.push(',');
            spec.push_str(&self.reset_value.to_string());
        }
        spec.push('}');
        spec
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: String,
    pub tagk: String,
    pub filter: String,
    pub group_by: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub metric: String,
    pub aggregation_function: String,
    pub rate: bool,
    /// `None` emits a bare `rate`; present options always add a bracketed spec.
    pub rate_options: Option<RateOptions>,
    /// Tag key to alternative values (OR-ed on the backend).
    pub tags: BTreeMap<String, Vec<String>>,
    pub filters: Vec<Filter>,
    pub downsampler: Downsampler,
}

impl Query {
    /// Rate token, or `None` when the query is not a rate.
    pub fn rate_token(&self) -> Option<String> {
        if !self.rate {
            return None;
        }
        match &self.rate_options {
            None => Some("rate".to_string()),
            Some(options) => Some(format!("rate{}", options.spec())),
        }
    }

    /// `metric{k1=v1|v2,k2=v3}` with keys in sorted order.
    pub fn metric_token(&self) -> String {
        let tags = self
            .tags
            .iter()
            .map(|(key, values)| format!("{}={}", key, values.join("|")))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{}}}", self.metric, tags)
    }

    /// Value of this query's `m` parameter.
    pub fn m_token(&self) -> String {
        let mut tokens = Vec::with_capacity(4);
        if !self.aggregation_function.is_empty() {
            tokens.push(self.aggregation_function.clone());
        }
        if !self.downsampler.is_null() {
            tokens.push(self.downsampler.to_string());
        }
        if let Some(rate) = self.rate_token() {
            tokens.push(rate);
        }
        tokens.push(self.metric_token());
        tokens.join(":")
    }
}

/// A single query call: one window, one or more queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub window: Window,
    pub queries: Vec<Query>,
    pub show_query: bool,
    /// Ask for millisecond timestamps in the result.
    pub ms_resolution: bool,
}

impl QueryRequest {
    /// Query-string parameters for `GET /api/query`, `m` repeated per query.
    pub fn parameterize(&self) -> Result<Vec<(&'static str, String)>, TsdbError> {
        let mut params = vec![("start", self.window.get_start()?)];
        if let Some(end) = self.window.get_end() {
            params.push(("end", end));
        }
        // presence of the key alone turns millisecond output on
        if self.ms_resolution {
            params.push(("ms", String::new()));
        }
        if self.show_query {
            params.push(("show_query", "true".to_string()));
        }
        params.extend(self.queries.iter().map(|query| ("m", query.m_token())));
        Ok(params)
    }
}
