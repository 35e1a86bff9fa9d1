// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Construction of the pooled `reqwest` transport from [`HttpConf`].

use crate::config::HttpConf;
use crate::errors::TsdbError;
use tracing::debug;

/// Builds the shared HTTP client.
///
/// `reqwest` has a single connect timeout covering TCP and TLS, so the dial
/// and handshake budgets are added together. It also pools per host only,
/// so the per-host idle cap is clamped to the global idle cap.
pub fn build_client(config: &HttpConf) -> Result<reqwest::Client, TsdbError> {
    let connect_timeout = config.dial_timeout + config.tls_handshake_timeout;
    let max_idle_per_host = if config.max_idle_conns == 0 {
        config.max_idle_conns_per_host
    } else {
        config.max_idle_conns_per_host.min(config.max_idle_conns)
    };

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(max_idle_per_host)
        .pool_idle_timeout(Some(config.idle_conn_timeout).filter(|d| !d.is_zero()));

    if !connect_timeout.is_zero() {
        builder = builder.connect_timeout(connect_timeout);
    }
    if !config.client_timeout.is_zero() {
        builder = builder.timeout(config.client_timeout);
    }

    debug!(
        connect_timeout = ?connect_timeout,
        client_timeout = ?config.client_timeout,
        max_idle_per_host,
        "Building TSDB HTTP client"
    );
    builder.build().map_err(TsdbError::Transport)
}
