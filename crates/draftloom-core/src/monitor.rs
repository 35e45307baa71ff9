//! Runtime and resource monitors
//!
//! Passive observers of console, network, performance, and memory
//! activity. They never act on what they see; their snapshots feed the
//! error categorizer's context map.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entries kept per observation kind before the oldest are dropped
pub const DEFAULT_BUFFER_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub url: String,
    pub status: Option<u16>,
    pub ok: bool,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfSample {
    pub label: String,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub at: DateTime<Utc>,
}

/// Bounded ring buffers of runtime observations
pub struct RuntimeMonitor {
    console: Mutex<VecDeque<ConsoleEntry>>,
    network: Mutex<VecDeque<NetworkEntry>>,
    perf: Mutex<VecDeque<PerfSample>>,
    memory: Mutex<VecDeque<MemorySample>>,
    capacity: usize,
}

impl RuntimeMonitor {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            console: Mutex::new(VecDeque::new()),
            network: Mutex::new(VecDeque::new()),
            perf: Mutex::new(VecDeque::new()),
            memory: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record_console(&self, level: ConsoleLevel, message: impl Into<String>) {
        if let Ok(mut buffer) = self.console.lock() {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(ConsoleEntry {
                level,
                message: message.into(),
                at: Utc::now(),
            });
        }
    }

    pub fn record_network(&self, url: impl Into<String>, status: Option<u16>, duration_ms: u64) {
        if let Ok(mut buffer) = self.network.lock() {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            let ok = status.is_some_and(|code| (200..400).contains(&code));
            buffer.push_back(NetworkEntry {
                url: url.into(),
                status,
                ok,
                duration_ms,
                at: Utc::now(),
            });
        }
    }

    pub fn record_perf(&self, label: impl Into<String>, duration_ms: u64) {
        if let Ok(mut buffer) = self.perf.lock() {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(PerfSample {
                label: label.into(),
                duration_ms,
                at: Utc::now(),
            });
        }
    }

    pub fn record_memory(&self, used_bytes: u64) {
        if let Ok(mut buffer) = self.memory.lock() {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(MemorySample {
                used_bytes,
                at: Utc::now(),
            });
        }
    }

    pub fn console_error_count(&self) -> usize {
        self.console
            .lock()
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|entry| entry.level == ConsoleLevel::Error)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn failed_request_count(&self) -> usize {
        self.network
            .lock()
            .map(|buffer| buffer.iter().filter(|entry| !entry.ok).count())
            .unwrap_or(0)
    }

    pub fn last_render_ms(&self) -> Option<u64> {
        self.perf.lock().ok().and_then(|buffer| {
            buffer
                .iter()
                .rev()
                .find(|sample| sample.label == "render")
                .map(|sample| sample.duration_ms)
        })
    }

    pub fn peak_memory_bytes(&self) -> Option<u64> {
        self.memory
            .lock()
            .ok()
            .and_then(|buffer| buffer.iter().map(|sample| sample.used_bytes).max())
    }

    /// Snapshot for the categorizer's context map
    pub fn failure_context(&self) -> HashMap<String, String> {
        let mut context = HashMap::new();
        context.insert(
            "console_errors".to_string(),
            self.console_error_count().to_string(),
        );
        context.insert(
            "failed_requests".to_string(),
            self.failed_request_count().to_string(),
        );
        if let Some(render_ms) = self.last_render_ms() {
            context.insert("last_render_ms".to_string(), render_ms.to_string());
        }
        if let Some(peak) = self.peak_memory_bytes() {
            context.insert("peak_memory_bytes".to_string(), peak.to_string());
        }
        context
    }
}

impl Default for RuntimeMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_error_count() {
        let monitor = RuntimeMonitor::new();
        monitor.record_console(ConsoleLevel::Log, "booting");
        monitor.record_console(ConsoleLevel::Error, "boom");
        monitor.record_console(ConsoleLevel::Error, "boom again");
        assert_eq!(monitor.console_error_count(), 2);
    }

    #[test]
    fn test_failed_requests() {
        let monitor = RuntimeMonitor::new();
        monitor.record_network("/api/data", Some(200), 20);
        monitor.record_network("/api/data", Some(500), 35);
        monitor.record_network("/api/down", None, 1_000);
        assert_eq!(monitor.failed_request_count(), 2);
    }

    #[test]
    fn test_last_render_ms() {
        let monitor = RuntimeMonitor::new();
        assert_eq!(monitor.last_render_ms(), None);

        monitor.record_perf("render", 18);
        monitor.record_perf("transpile", 7);
        monitor.record_perf("render", 12);
        assert_eq!(monitor.last_render_ms(), Some(12));
    }

    #[test]
    fn test_buffers_are_bounded() {
        let monitor = RuntimeMonitor::with_capacity(3);
        for i in 0..10 {
            monitor.record_console(ConsoleLevel::Error, format!("e{i}"));
        }
        assert_eq!(monitor.console_error_count(), 3);
    }

    #[test]
    fn test_failure_context_keys() {
        let monitor = RuntimeMonitor::new();
        monitor.record_console(ConsoleLevel::Error, "boom");
        monitor.record_perf("render", 25);
        monitor.record_memory(42_000_000);

        let context = monitor.failure_context();
        assert_eq!(context.get("console_errors").map(String::as_str), Some("1"));
        assert_eq!(context.get("failed_requests").map(String::as_str), Some("0"));
        assert_eq!(context.get("last_render_ms").map(String::as_str), Some("25"));
        assert_eq!(
            context.get("peak_memory_bytes").map(String::as_str),
            Some("42000000")
        );
    }
}
