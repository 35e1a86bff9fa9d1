// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON body for `POST /api/query`.

use crate::errors::TsdbError;
use crate::query::{Filter, Query, QueryRequest};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TsdbQueryRequest {
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    pub queries: Vec<TsdbQuery>,
    pub show_query: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ms_resolution: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TsdbQuery {
    pub aggregator: String,
    pub metric: String,
    pub rate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_opts: Option<TsdbRateOpts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downsample: Option<String>,
    /// Value lists already joined with `|`.
    pub tags: BTreeMap<String, String>,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TsdbRateOpts {
    pub counter: bool,
    pub counter_max: i64,
    pub reset_value: i64,
    pub drop_resets: bool,
}

impl TsdbQueryRequest {
    pub fn from_request(request: &QueryRequest) -> Result<Self, TsdbError> {
        Ok(Self {
            start: request.window.get_start()?,
            end: request.window.get_end(),
            queries: request.queries.iter().map(TsdbQuery::from).collect(),
            show_query: request.show_query,
            ms_resolution: request.ms_resolution,
        })
    }
}

impl From<&Query> for TsdbQuery {
    fn from(query: &Query) -> Self {
        let rate_opts = query
            .rate_options
            .filter(|_| query.rate)
            .map(|options| {
                if options.is_counter() {
                    TsdbRateOpts {
                        counter: true,
                        counter_max: options.counter_max,
                        reset_value: options.reset_value,
                        drop_resets: false,
                    }
                } else {
                    TsdbRateOpts {
                        counter: true,
                        drop_resets: true,
                        ..Default::default()
                    }
                }
            });
        Self {
            aggregator: query.aggregation_function.clone(),
            metric: query.metric.clone(),
            rate: query.rate,
            rate_opts,
            downsample: (!query.downsampler.is_null()).then(|| query.downsampler.to_string()),
            tags: query
                .tags
                .iter()
                .map(|(key, values)| (key.clone(), values.join("|")))
                .collect(),
            filters: query.filters.clone(),
        }
    }
}

impl QueryRequest {
    pub fn to_wire(&self) -> Result<TsdbQueryRequest, TsdbError> {
        TsdbQueryRequest::from_request(self)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, TsdbError> {
        let wire = self.to_wire()?;
        serde_json::to_vec(&wire).map_err(|e| TsdbError::RequestBuild(e.to_string()))
    }
}
