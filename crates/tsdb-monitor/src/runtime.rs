// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime statistics sampled by the monitor.
//!
//! Heap figures come from [`CountingAllocator`], which only sees allocations
//! once installed as the process allocator:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOCATOR: tsdb_monitor::CountingAllocator = tsdb_monitor::CountingAllocator;
//! ```

use crate::process::{count_threads, read_vm_size};
use std::alloc::{GlobalAlloc, Layout, System};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// One snapshot of runtime counters. Counters are cumulative since start.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuntimeStats {
    /// OS threads of the process.
    pub threads: u64,
    /// Bytes currently allocated on the heap.
    pub heap_alloc: u64,
    /// Bytes obtained from the OS.
    pub heap_sys: u64,
    pub mallocs: u64,
    pub frees: u64,
    /// Rust has no collector; stays zero unless a custom source fills it.
    pub gc_pause_total_ns: u64,
    pub num_gc: u64,
}

pub trait RuntimeStatsSource: Send + Sync {
    fn read(&self) -> RuntimeStats;
}

static ALLOCATED_BYTES: AtomicU64 = AtomicU64::new(0);
static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);

/// `System` allocator wrapper keeping allocation counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingAllocator;

/// Values of the [`CountingAllocator`] counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorCounters {
    pub allocated_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
}

impl CountingAllocator {
    #[must_use]
    pub fn counters() -> AllocatorCounters {
        AllocatorCounters {
            allocated_bytes: ALLOCATED_BYTES.load(Ordering::Relaxed),
            mallocs: MALLOCS.load(Ordering::Relaxed),
            frees: FREES.load(Ordering::Relaxed),
        }
    }

    fn record_alloc(size: usize) {
        ALLOCATED_BYTES.fetch_add(size as u64, Ordering::Relaxed);
        MALLOCS.fetch_add(1, Ordering::Relaxed);
    }

    fn record_free(size: usize) {
        ALLOCATED_BYTES.fetch_sub(size as u64, Ordering::Relaxed);
        FREES.fetch_add(1, Ordering::Relaxed);
    }
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            Self::record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            Self::record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        Self::record_free(layout.size());
    }

    // counted as a free of the old block plus an allocation of the new one
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            Self::record_free(layout.size());
            Self::record_alloc(new_size);
        }
        new_ptr
    }
}

/// Default [`RuntimeStatsSource`]: allocator counters plus `/proc/self`.
#[derive(Debug, Clone)]
pub struct AllocatorStats {
    proc_self: PathBuf,
}

impl Default for AllocatorStats {
    fn default() -> Self {
        Self::with_proc_dir("/proc/self")
    }
}

impl AllocatorStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads thread and memory figures below `proc_self` instead of `/proc/self`.
    pub fn with_proc_dir(proc_self: impl Into<PathBuf>) -> Self {
        Self {
            proc_self: proc_self.into(),
        }
    }
}

impl RuntimeStatsSource for AllocatorStats {
    fn read(&self) -> RuntimeStats {
        let counters = CountingAllocator::counters();
        let threads = count_threads(&self.proc_self).unwrap_or_else(|e| {
            debug!("Failed to count threads: {e}");
            0
        });
        let heap_sys = read_vm_size(&self.proc_self).unwrap_or_else(|e| {
            debug!("Failed to read virtual memory size: {e}");
            0
        });
        RuntimeStats {
            threads,
            heap_alloc: counters.allocated_bytes,
            heap_sys,
            mallocs: counters.mallocs,
            frees: counters.frees,
            gc_pause_total_ns: 0,
            num_gc: 0,
        }
    }
}

/// Additional runtime figure sampled on every runtime tick.
#[derive(Debug, Clone)]
pub struct ExtraMetric {
    pub field: String,
    /// Metric field name; defaults to `field`.
    pub name: String,
    /// Emit the change since the previous tick instead of the raw value.
    pub delta: bool,
    pub accessor: fn(&RuntimeStats) -> f64,
}

impl ExtraMetric {
    pub fn new(field: impl Into<String>, accessor: fn(&RuntimeStats) -> f64) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            field,
            delta: false,
            accessor,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() {
            self.name = name;
        }
        self
    }

    #[must_use]
    pub fn delta(mut self) -> Self {
        self.delta = true;
        self
    }

    pub(crate) fn value(&self, current: &RuntimeStats, previous: &RuntimeStats) -> f64 {
        let value = (self.accessor)(current);
        if self.delta {
            value - (self.accessor)(previous)
        } else {
            value
        }
    }
}
