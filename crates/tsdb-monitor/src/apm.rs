// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

/// Per-transaction call statistics from an APM agent.
pub trait ApmSource: Send + Sync {
    /// Current value for each business transaction, keyed by transaction name.
    fn business_transaction_stats(&self) -> HashMap<String, f64>;
}

/// Used when no APM agent is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoApm;

impl ApmSource for NoApm {
    fn business_transaction_stats(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
}
