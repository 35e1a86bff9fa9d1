// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process CPU and memory readings from `/proc`.

use nix::unistd::{sysconf, SysconfVar};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

const DEFAULT_CLK_TCK: f64 = 100.0;
const DEFAULT_PAGE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessStat {
    pub cpu_percent: f64,
    pub rss_bytes: u64,
}

pub trait ProcessSampler: Send + Sync {
    fn sample(&self, pid: u32) -> io::Result<ProcessStat>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuReading {
    pid: u32,
    cpu_secs: f64,
    uptime_secs: f64,
}

/// [`ProcessSampler`] over `/proc/<pid>/stat`.
///
/// CPU usage is the share of one core used since the previous sample. The
/// first sample of a pid averages over the whole process lifetime.
#[derive(Debug)]
pub struct ProcStatSampler {
    proc_root: PathBuf,
    clk_tck: f64,
    page_size: u64,
    last: Mutex<Option<CpuReading>>,
}

impl Default for ProcStatSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcStatSampler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/proc", clk_tck(), page_size())
    }

    pub fn with_root(proc_root: impl Into<PathBuf>, clk_tck: f64, page_size: u64) -> Self {
        Self {
            proc_root: proc_root.into(),
            clk_tck,
            page_size,
            last: Mutex::new(None),
        }
    }

    fn cpu_percent(&self, reading: CpuReading, start_secs: f64) -> f64 {
        let previous = match self.last.lock() {
            Ok(mut last) => last.replace(reading),
            Err(_) => None,
        };
        let (cpu_secs, elapsed) = match previous.filter(|previous| previous.pid == reading.pid) {
            Some(previous) => (
                reading.cpu_secs - previous.cpu_secs,
                reading.uptime_secs - previous.uptime_secs,
            ),
            None => (reading.cpu_secs, reading.uptime_secs - start_secs),
        };
        if elapsed <= 0.0 {
            return 0.0;
        }
        100.0 * cpu_secs / elapsed
    }
}

impl ProcessSampler for ProcStatSampler {
    fn sample(&self, pid: u32) -> io::Result<ProcessStat> {
        let stat = fs::read_to_string(self.proc_root.join(pid.to_string()).join("stat"))?;
        let fields = parse_stat(&stat)?;
        let uptime_secs = read_uptime(&self.proc_root.join("uptime"))?;

        let reading = CpuReading {
            pid,
            cpu_secs: (fields.utime + fields.stime) as f64 / self.clk_tck,
            uptime_secs,
        };
        let start_secs = fields.starttime as f64 / self.clk_tck;

        Ok(ProcessStat {
            cpu_percent: self.cpu_percent(reading, start_secs),
            rss_bytes: fields.rss_pages.saturating_mul(self.page_size),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatFields {
    utime: u64,
    stime: u64,
    starttime: u64,
    rss_pages: u64,
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

// The command name may hold spaces and parentheses, so fields are counted
// from the last ')'. Index 0 is then field 3 (state) of proc(5).
fn parse_stat(stat: &str) -> io::Result<StatFields> {
    let (_, rest) = stat
        .rsplit_once(')')
        .ok_or_else(|| invalid("Missing command name in stat"))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let field = |index: usize| -> io::Result<u64> {
        fields
            .get(index)
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| invalid("Failed to parse stat fields"))
    };
    Ok(StatFields {
        utime: field(11)?,
        stime: field(12)?,
        starttime: field(19)?,
        rss_pages: field(21)?,
    })
}

fn read_uptime(path: &Path) -> io::Result<f64> {
    let content = fs::read_to_string(path)?;
    content
        .split_whitespace()
        .next()
        .and_then(|value| value.parse::<f64>().ok())
        .ok_or_else(|| invalid("Failed to parse uptime data"))
}

/// Number of entries in `<proc_dir>/task`, one per thread.
pub(crate) fn count_threads(proc_dir: &Path) -> io::Result<u64> {
    Ok(fs::read_dir(proc_dir.join("task"))?.count() as u64)
}

/// `VmSize` from `<proc_dir>/status`, in bytes.
pub(crate) fn read_vm_size(proc_dir: &Path) -> io::Result<u64> {
    let status = fs::read_to_string(proc_dir.join("status"))?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmSize:"))
        .and_then(|value| value.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .ok_or_else(|| invalid("Failed to parse VmSize"))
}

#[allow(clippy::cast_precision_loss)]
fn clk_tck() -> f64 {
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as f64,
        _ => {
            warn!("Could not find system clock ticks per second, assuming {DEFAULT_CLK_TCK}");
            DEFAULT_CLK_TCK
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn page_size() -> u64 {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as u64,
        _ => {
            warn!("Could not find page size, assuming {DEFAULT_PAGE_SIZE}");
            DEFAULT_PAGE_SIZE
        }
    }
}
