use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Identifier in the pipeline's typed event table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventId {
    /// A node recorded a named timestamp for a frame.
    TimestampRecord,
    /// A latency measurement between two recorded points completed.
    LatencyCapture,
    /// A sink drained the end-of-stream marker of every stream of a request.
    Finish,
    /// Application-defined event.
    Custom(u32),
}

/// Data handed to event listeners.
#[derive(Clone)]
pub enum EventPayload {
    Timestamp { frame_id: u32, label: String },
    Latency { label: String, elapsed: Duration },
    Finish { stream_count: usize },
    Custom(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPayload::Timestamp { frame_id, label } => {
                write!(f, "Timestamp({label}@{frame_id})")
            }
            EventPayload::Latency { label, elapsed } => {
                write!(f, "Latency({label}: {elapsed:?})")
            }
            EventPayload::Finish { stream_count } => write!(f, "Finish({stream_count} streams)"),
            EventPayload::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Listener callback. Returning `false` reports a callback failure to the
/// emitter. Listeners run synchronously on the emitting thread and must not
/// block.
pub type EventListener = Arc<dyn Fn(&EventPayload) -> bool + Send + Sync>;

struct EventSlot {
    listeners: Vec<EventListener>,
    /// (fired, consumed) counters; `wait_for` consumes one firing, so a
    /// firing that happened just before the wait is not missed.
    fire_count: Arc<(Mutex<(u64, u64)>, Condvar)>,
}

/// Typed event table mapping event ids to listeners.
#[derive(Default)]
pub struct EventBus {
    table: RwLock<HashMap<EventId, EventSlot>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_event(&self, id: EventId) -> Result<()> {
        let mut table = self.table.write().unwrap();
        if table.contains_key(&id) {
            return Err(Error::EventRegisterFailed(id));
        }
        table.insert(
            id,
            EventSlot {
                listeners: Vec::new(),
                fire_count: Arc::new((Mutex::new((0, 0)), Condvar::new())),
            },
        );
        Ok(())
    }

    pub fn register_callback(&self, id: EventId, cb: EventListener) -> Result<()> {
        let mut table = self.table.write().unwrap();
        let slot = table.get_mut(&id).ok_or(Error::EventNotFound(id))?;
        slot.listeners.push(cb);
        Ok(())
    }

    /// Invoke all listeners of `id` on the current thread.
    pub fn emit(&self, id: EventId, payload: &EventPayload) -> Result<()> {
        let table = self.table.read().unwrap();
        let slot = table.get(&id).ok_or(Error::EventNotFound(id))?;
        let mut ok = true;
        for listener in &slot.listeners {
            ok &= listener(payload);
        }
        let (count, cond) = &*slot.fire_count;
        count.lock().unwrap().0 += 1;
        cond.notify_all();
        if ok { Ok(()) } else { Err(Error::CallbackFail(id)) }
    }

    /// Block until `id` fires. One firing satisfies one wait; a firing that
    /// happened before the call (and was not yet waited on) satisfies it
    /// immediately.
    pub fn wait_for(&self, id: EventId, timeout: Duration) -> Result<()> {
        let fire_count = {
            let table = self.table.read().unwrap();
            let slot = table.get(&id).ok_or(Error::EventNotFound(id))?;
            slot.fire_count.clone()
        };
        let (count, cond) = &*fire_count;
        let deadline = Instant::now() + timeout;
        let mut guard = count.lock().unwrap();
        loop {
            let (fired, consumed) = *guard;
            if fired > consumed {
                guard.1 = consumed + 1;
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::EventWaitTimeout(id));
            }
            let (g, _r) = cond.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
        }
    }

    pub fn reset_all_callbacks(&self) {
        let mut table = self.table.write().unwrap();
        for slot in table.values_mut() {
            slot.listeners.clear();
        }
    }
}

/// Per-label latency accounting across the pipeline.
///
/// Nodes bracket work with `start_recording`/`stop_recording`; completed
/// intervals accumulate in one histogram per label (microseconds).
pub struct LatencyMonitor {
    inner: Mutex<LatencyInner>,
}

struct LatencyInner {
    open: HashMap<(u32, String), Instant>,
    histograms: HashMap<String, Histogram<u64>>,
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LatencyInner {
                open: HashMap::new(),
                histograms: HashMap::new(),
            }),
        }
    }

    pub fn start_recording(&self, frame_id: u32, label: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .open
            .insert((frame_id, label.to_string()), Instant::now());
    }

    /// Close the interval opened by `start_recording` and return its length.
    pub fn stop_recording(&self, frame_id: u32, label: &str) -> Option<Duration> {
        let mut inner = self.inner.lock().unwrap();
        let start = inner.open.remove(&(frame_id, label.to_string()))?;
        let elapsed = start.elapsed();
        let hist = inner
            .histograms
            .entry(label.to_string())
            .or_insert_with(|| {
                Histogram::new_with_bounds(1, 60_000_000, 2).expect("histogram bounds")
            });
        let micros = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        if hist.record(micros.max(1)).is_err() {
            warn!("latency sample out of histogram range: {micros}us");
        }
        Some(elapsed)
    }

    /// Render per-label latency statistics as a JSON object.
    pub fn report_to_string(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let mut report = serde_json::Map::new();
        for (label, hist) in &inner.histograms {
            let mut entry = serde_json::Map::new();
            entry.insert("count".into(), hist.len().into());
            entry.insert("mean_us".into(), hist.mean().into());
            entry.insert("p50_us".into(), hist.value_at_quantile(0.5).into());
            entry.insert("p99_us".into(), hist.value_at_quantile(0.99).into());
            entry.insert("max_us".into(), hist.max().into());
            report.insert(label.clone(), serde_json::Value::Object(entry));
        }
        serde_json::Value::Object(report).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn register_emit_and_listener_order() {
        let bus = EventBus::new();
        bus.register_event(EventId::Custom(7)).unwrap();
        assert!(matches!(
            bus.register_event(EventId::Custom(7)),
            Err(Error::EventRegisterFailed(_))
        ));

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        bus.register_callback(
            EventId::Custom(7),
            Arc::new(move |_p| {
                c.fetch_add(1, Ordering::SeqCst);
                true
            }),
        )
        .unwrap();

        bus.emit(
            EventId::Custom(7),
            &EventPayload::Custom(Arc::new(1u32)),
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_unregistered_is_error() {
        let bus = EventBus::new();
        assert!(matches!(
            bus.emit(EventId::Finish, &EventPayload::Finish { stream_count: 1 }),
            Err(Error::EventNotFound(EventId::Finish))
        ));
    }

    #[test]
    fn failing_listener_reports_callback_fail() {
        let bus = EventBus::new();
        bus.register_event(EventId::Custom(0)).unwrap();
        bus.register_callback(EventId::Custom(0), Arc::new(|_p| false))
            .unwrap();
        assert!(matches!(
            bus.emit(EventId::Custom(0), &EventPayload::Custom(Arc::new(()))),
            Err(Error::CallbackFail(_))
        ));
    }

    #[test]
    fn latency_capture_roundtrip() {
        let mon = LatencyMonitor::new();
        mon.start_recording(1, "stage");
        std::thread::sleep(Duration::from_millis(2));
        let elapsed = mon.stop_recording(1, "stage").unwrap();
        assert!(elapsed >= Duration::from_millis(1));
        // unknown interval
        assert!(mon.stop_recording(2, "stage").is_none());
        let report = mon.report_to_string();
        assert!(report.contains("stage"));
    }
}
