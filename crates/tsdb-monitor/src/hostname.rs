// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use tracing::warn;

pub const UNKNOWN_HOSTNAME: &str = "unknown";

/// Hostname used for the `host` tag.
///
/// `HOSTNAME` wins when set, then the system hostname, then `unknown`.
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("Failed to get system hostname: {e}"),
    }

    warn!("Could not determine hostname, using '{UNKNOWN_HOSTNAME}'");
    UNKNOWN_HOSTNAME.to_string()
}
