// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Exit-call instrumentation for query requests.
//!
//! An APM agent (or anything else) can observe backend calls by implementing
//! [`SpanProvider`]. [`TracingSpanProvider`] maps them onto `tracing` spans.

use crate::errors::TsdbError;
use tracing::{error, info_span};

pub trait SpanProvider: Send + Sync {
    /// Opens a span for an outgoing call to `target` (the request URL).
    fn enter_span(&self, name: &str, target: &str) -> Box<dyn Span>;

    /// Reports an error that happened after the exit call completed
    /// (bad status, undecodable body).
    fn record_error(&self, _error: &TsdbError) {}
}

pub trait Span: Send {
    fn end(self: Box<Self>);
    fn end_with_error(self: Box<Self>, error: &TsdbError);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSpanProvider;

struct TracingSpan {
    span: tracing::Span,
}

impl SpanProvider for TracingSpanProvider {
    fn enter_span(&self, name: &str, target: &str) -> Box<dyn Span> {
        Box::new(TracingSpan {
            span: info_span!("exit_call", backend = %name, url = %target),
        })
    }

    fn record_error(&self, error: &TsdbError) {
        error!("TSDB query failed: {error}");
    }
}

impl Span for TracingSpan {
    fn end(self: Box<Self>) {
        drop(self.span);
    }

    fn end_with_error(self: Box<Self>, error: &TsdbError) {
        self.span.in_scope(|| error!("Exit call failed: {error}"));
    }
}
