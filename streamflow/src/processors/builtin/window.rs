//! Time windows keyed by stage.
//!
//! Event time is the item's `created_at`. Tumbling and session windows
//! collect items until one arrives at or after `start + sizeMs`; that item
//! closes the open window (which is emitted) and opens the next one. Sliding
//! windows evict entries older than `sizeMs` and emit their full contents on
//! every item.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::ProcessorContext;
use crate::core::StreamItem;
use crate::errors::ProcessorError;
use crate::processors::{Processor, ProcessorOutput};

/// Window strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Disjoint, sequential windows.
    #[default]
    Tumbling,
    /// Overlapping window re-emitted on every item.
    Sliding,
    /// Currently closes by the tumbling rule.
    Session,
}

impl WindowKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Tumbling => "tumbling",
            Self::Sliding => "sliding",
            Self::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowEntry {
    ts: i64,
    payload: Value,
}

/// An open window as stored in pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Window {
    id: String,
    kind: WindowKind,
    size_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slide_ms: Option<u64>,
    items: Vec<WindowEntry>,
    start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<i64>,
}

impl Window {
    fn open(stage_id: &str, kind: WindowKind, size_ms: u64, slide_ms: Option<u64>, ts: i64) -> Self {
        Self {
            id: format!("{stage_id}-{ts}"),
            kind,
            size_ms,
            slide_ms,
            items: Vec::new(),
            start_time: ts,
            end_time: None,
        }
    }

    fn deadline(&self) -> i64 {
        self.start_time
            .saturating_add(i64::try_from(self.size_ms).unwrap_or(i64::MAX))
    }

    fn to_payload(&self) -> Value {
        json!({
            "window_id": self.id,
            "kind": self.kind.as_str(),
            "start": self.start_time,
            "end": self.end_time,
            "count": self.items.len(),
            "items": self.items.iter().map(|e| e.payload.clone()).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WindowState {
    #[serde(default)]
    current: Option<Window>,
}

/// Groups items into time windows and emits closed or sliding windows.
///
/// Params: `kind` (`tumbling`, `sliding`, `session`), `sizeMs` (required),
/// `slideMs` (recorded on the window only). State lives under
/// `window:{stage}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowProcessor;

#[async_trait]
impl Processor for WindowProcessor {
    fn name(&self) -> &str {
        "window"
    }

    async fn process(
        &self,
        item: StreamItem,
        ctx: &ProcessorContext,
    ) -> Result<ProcessorOutput, ProcessorError> {
        let kind: WindowKind = match ctx.param("kind") {
            Some(v) => serde_json::from_value(v)
                .map_err(|e| ProcessorError::invalid_param("kind", e.to_string()))?,
            None => WindowKind::default(),
        };
        let size_ms = match ctx.param_u64("sizeMs")? {
            Some(size) if size > 0 => size,
            _ => return Err(ProcessorError::invalid_param("sizeMs", "must be a positive integer")),
        };
        let slide_ms = ctx.param_u64("slideMs")?;
        let ts = item.timestamp_ms();
        let stage_id = ctx.stage_id().to_string();
        let entry = WindowEntry {
            ts,
            payload: item.payload.clone(),
        };

        let key = format!("window:{stage_id}");
        let emitted = ctx.state().update_typed::<WindowState, _, _>(&key, |state| {
            let window = state
                .current
                .get_or_insert_with(|| Window::open(&stage_id, kind, size_ms, slide_ms, ts));

            match kind {
                WindowKind::Sliding => {
                    let horizon = ts.saturating_sub(i64::try_from(size_ms).unwrap_or(i64::MAX));
                    window.items.retain(|e| e.ts > horizon);
                    window.items.push(entry);
                    window.start_time = window.items.first().map_or(ts, |e| e.ts);
                    window.end_time = Some(ts);
                    Some(window.to_payload())
                }
                WindowKind::Tumbling | WindowKind::Session => {
                    if ts >= window.deadline() {
                        let mut closed = Window::open(&stage_id, kind, size_ms, slide_ms, ts);
                        closed.items.push(entry);
                        std::mem::swap(window, &mut closed);
                        closed.end_time = Some(closed.deadline());
                        Some(closed.to_payload())
                    } else {
                        window.items.push(entry);
                        None
                    }
                }
            }
        })?;

        Ok(emitted.map(|payload| item.with_payload(payload)).into())
    }
}
