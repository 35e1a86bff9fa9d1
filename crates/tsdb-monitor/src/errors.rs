// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tsdb::TsdbError;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A tag built from the monitor configuration was rejected.
    #[error("Invalid monitor tag: {0}")]
    Tag(#[from] TsdbError),

    #[error("Monitor not ready: {0}")]
    Precondition(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tsdb::Tag;

    #[test]
    fn test_tag_error_wraps_validation_message() {
        let err: MonitorError = Tag::new("app", "my app").unwrap_err().into();
        assert_eq!(
            err.to_string(),
            "Invalid monitor tag: Tag value cannot contain space"
        );
    }
}
