//! Structured allocator lifecycle records.
//!
//! The allocator appends one record per decision worth explaining (which path
//! served an allocation, why a request failed, what the validator found).
//! Records below the configured threshold are dropped before any formatting
//! work happens.

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    /// Parse a threshold name; `off`/`none` disables recording. Unknown names
    /// keep the default `Warn` threshold.
    #[must_use]
    pub fn parse_threshold(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" => None,
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            _ => Some(Self::Warn),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`malloc`, `free`, `calloc`, `realloc`, `init`, `checkheap`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `extend_heap`, ...).
    pub event: &'static str,
    /// Payload address involved in the event.
    pub addr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size class involved in the event.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live allocated block count.
    pub active_count: usize,
    /// Snapshot: current heap size in bytes.
    pub heap_size: usize,
}

/// Per-allocator record sink.
#[derive(Debug, Default)]
pub(crate) struct LifecycleLog {
    threshold: Option<AllocatorLogLevel>,
    next_decision_id: u64,
    records: Vec<AllocatorLogRecord>,
}

/// Fields of one event; snapshot fields are filled in by the allocator.
pub(crate) struct LogEvent {
    pub level: AllocatorLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub addr: Option<usize>,
    pub size: Option<usize>,
    pub class: Option<usize>,
    pub outcome: &'static str,
}

impl LogEvent {
    pub(crate) fn new(
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            addr: None,
            size: None,
            class: None,
            outcome,
        }
    }

    pub(crate) fn addr(mut self, addr: usize) -> Self {
        self.addr = Some(addr);
        self
    }

    pub(crate) fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn class(mut self, class: usize) -> Self {
        self.class = Some(class);
        self
    }
}

impl LifecycleLog {
    pub(crate) fn new(threshold: Option<AllocatorLogLevel>) -> Self {
        Self {
            threshold,
            next_decision_id: 1,
            records: Vec::new(),
        }
    }

    pub(crate) fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.threshold.is_some_and(|min| level >= min)
    }

    pub(crate) fn set_threshold(&mut self, threshold: Option<AllocatorLogLevel>) {
        self.threshold = threshold;
    }

    /// Append a record. `details` is only evaluated when the level passes the
    /// threshold.
    pub(crate) fn record(
        &mut self,
        event: LogEvent,
        details: impl FnOnce() -> String,
        active_count: usize,
        heap_size: usize,
    ) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        let trace_id = format!("segalloc::malloc::{}::{:016x}", event.symbol, decision_id);
        self.records.push(AllocatorLogRecord {
            decision_id,
            trace_id,
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            addr: event.addr,
            size: event.size,
            class: event.class,
            outcome: event.outcome,
            details: details(),
            active_count,
            heap_size,
        });
    }

    pub(crate) fn records(&self) -> &[AllocatorLogRecord] {
        &self.records
    }

    pub(crate) fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: AllocatorLogLevel) -> LogEvent {
        LogEvent {
            level,
            symbol: "malloc",
            event: "alloc",
            addr: Some(0x88),
            size: Some(24),
            class: Some(0),
            outcome: "success",
        }
    }

    #[test]
    fn test_threshold_filters_levels() {
        let mut log = LifecycleLog::new(Some(AllocatorLogLevel::Info));
        log.record(event(AllocatorLogLevel::Trace), || "dropped".into(), 0, 0);
        log.record(event(AllocatorLogLevel::Warn), || "kept".into(), 1, 392);
        assert_eq!(log.records().len(), 1);
        let rec = &log.records()[0];
        assert_eq!(rec.details, "kept");
        assert_eq!(rec.decision_id, 1);
        assert_eq!(rec.active_count, 1);
        assert!(rec.trace_id.starts_with("segalloc::malloc::malloc::"));
    }

    #[test]
    fn test_disabled_log_skips_detail_formatting() {
        let mut log = LifecycleLog::new(None);
        log.record(
            event(AllocatorLogLevel::Error),
            || panic!("details must not be built when disabled"),
            0,
            0,
        );
        assert!(log.drain().is_empty());
    }

    #[test]
    fn test_decision_ids_are_monotonic() {
        let mut log = LifecycleLog::new(Some(AllocatorLogLevel::Trace));
        for _ in 0..3 {
            log.record(event(AllocatorLogLevel::Trace), String::new, 0, 0);
        }
        let ids: Vec<u64> = log.drain().iter().map(|r| r.decision_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(AllocatorLogLevel::parse_threshold("off"), None);
        assert_eq!(
            AllocatorLogLevel::parse_threshold("DEBUG"),
            Some(AllocatorLogLevel::Debug)
        );
        assert_eq!(
            AllocatorLogLevel::parse_threshold("whatever"),
            Some(AllocatorLogLevel::Warn)
        );
    }
}
