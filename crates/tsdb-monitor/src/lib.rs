// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic process and runtime sampler feeding a TSDB client.
//!
//! A [`Monitor`] runs three loops: runtime statistics, uptime per routing
//! key, and APM business transaction counts. Samples are named
//! `{namespace}.{type}.{field}` and tagged with app, host and pid.
//!
//! Runtime and uptime samples use the `gomon` type so existing dashboards
//! keep matching, with two naming differences from earlier `gomon` feeds:
//!
//! * the concurrency gauge is `gomon.threads`, the OS thread count of the
//!   process, and there is no `gomon.goroutines`;
//! * APM counts go under their own type, `{namespace}.calls.<transaction>`,
//!   instead of `gomon`.
//!
//! [`MonitorHandle::record`] emits application samples under `gomon` with
//! the same tags.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod apm;
pub mod errors;
pub mod hostname;
pub mod monitor;
pub mod process;
pub mod runtime;

pub use apm::{ApmSource, NoApm};
pub use errors::MonitorError;
pub use monitor::{Monitor, MonitorConfig, MonitorHandle};
pub use process::{ProcStatSampler, ProcessSampler, ProcessStat};
pub use runtime::{
    AllocatorCounters, AllocatorStats, CountingAllocator, ExtraMetric, RuntimeStats,
    RuntimeStatsSource,
};
