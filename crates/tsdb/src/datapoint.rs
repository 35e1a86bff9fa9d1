// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::tag::Tags;
use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// One observation sent to the backend.
///
/// Owned by the writer queue once enqueued and dropped after the batch that
/// carries it has been serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub metric: String,
    pub timestamp: i64,
    pub value: f64,
    pub tags: Tags,
}

impl DataPoint {
    pub fn new(metric: impl Into<String>, timestamp: i64, value: f64, tags: Tags) -> Self {
        Self {
            metric: metric.into(),
            timestamp,
            value,
            tags,
        }
    }

    /// Builds a data point stamped with the current wall clock time.
    pub fn now(metric: impl Into<String>, value: f64, tags: Tags) -> Self {
        Self::new(metric, unix_now(), value, tags)
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:.6}", self.metric, self.timestamp, self.value)?;
        for tag in self.tags.iter() {
            write!(f, " {tag}")?;
        }
        Ok(())
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
        .try_into()
        .unwrap_or_default()
}
