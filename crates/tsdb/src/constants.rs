// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Capacity of the queue between `put` callers and the background writer.
/// Independent of the configured flush buffer size.
pub const PUT_QUEUE_CAPACITY: usize = 1000;

/// Upper bound on the final flush performed when the writer shuts down.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub const QUERY_ENDPOINT: &str = "query";
pub const PUT_ENDPOINT: &str = "put";

/// Message used when an error envelope carries no `message` field.
pub const UNKNOWN_ERROR: &str = "Unknown Error";
