//! Tool-call tracking.
//!
//! Every tool body runs inside [`track`], which appends a record to the
//! session's tool-call list, links it to the enclosing call (dynamic
//! scope), emits `tool_start` and `tool_end`/`tool_error` on the bus, and
//! restores the parent scope on every exit path.

use std::time::Instant;

use braid_domain::error::Result;
use braid_domain::{EventKind, ToolCallRecord};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::context::SearchContext;

/// Handle the tool body uses to attach its result summary.
pub struct TrackHandle {
    summary: Mutex<Value>,
}

impl TrackHandle {
    pub fn set_summary(&self, summary: Value) {
        *self.summary.lock() = summary;
    }
}

/// Run `body` as a tracked tool call named `tool`.
pub fn track<T>(
    ctx: &SearchContext,
    tool: &str,
    args: Value,
    body: impl FnOnce(&TrackHandle) -> Result<T>,
) -> Result<T> {
    let parent = ctx.current_parent();
    let idx = ctx.with_tool_calls(|calls| {
        calls.push(ToolCallRecord::started(tool, args.clone()));
        let idx = calls.len() - 1;
        if let Some(p) = parent {
            if let Some(record) = calls.get_mut(p) {
                record.children.push(idx);
            }
        }
        idx
    });

    ctx.bus
        .emit(EventKind::ToolStart, json!({ "tool": tool, "args": args }));

    // Nested tools started by the body attach to this record.
    ctx.set_current_parent(Some(idx));

    let handle = TrackHandle {
        summary: Mutex::new(Value::Object(Default::default())),
    };
    let started = Instant::now();
    let outcome = body(&handle);
    let duration_ms = started.elapsed().as_millis() as u64;

    ctx.set_current_parent(parent);

    let summary = handle.summary.into_inner();
    match &outcome {
        Ok(_) => {
            ctx.with_tool_calls(|calls| {
                let record = &mut calls[idx];
                record.duration_ms = duration_ms;
                record.result_summary = summary.clone();
            });
            ctx.bus.emit(
                EventKind::ToolEnd,
                json!({ "tool": tool, "duration_ms": duration_ms, "summary": summary }),
            );
        }
        Err(e) => {
            let message = e.to_string();
            ctx.with_tool_calls(|calls| {
                let record = &mut calls[idx];
                record.duration_ms = duration_ms;
                record.error = Some(message.clone());
            });
            ctx.bus.emit(
                EventKind::ToolError,
                json!({ "tool": tool, "duration_ms": duration_ms, "error": message }),
            );
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::bare_context;
    use braid_domain::error::Error;

    #[test]
    fn records_success_with_summary_and_duration() {
        let ctx = bare_context();
        let out = track(&ctx, "search", json!({"query": "q"}), |tc| {
            tc.set_summary(json!({"num_results": 3}));
            Ok(42)
        })
        .unwrap();
        assert_eq!(out, 42);

        let calls = ctx.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "search");
        assert_eq!(calls[0].result_summary["num_results"], 3);
        assert!(calls[0].error.is_none());

        let kinds: Vec<_> = ctx.bus.bus().replay().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::ToolStart, EventKind::ToolEnd]);
    }

    #[test]
    fn records_error_and_emits_tool_error() {
        let ctx = bare_context();
        let err = track(&ctx, "search", json!({}), |_tc| {
            Err::<(), _>(Error::Http("503".into()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Http(_)));

        let calls = ctx.tool_calls();
        assert_eq!(calls[0].error.as_deref(), Some("HTTP: 503"));
        let kinds: Vec<_> = ctx.bus.bus().replay().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::ToolStart, EventKind::ToolError]);
    }

    #[test]
    fn nested_calls_link_to_enclosing_record() {
        let ctx = bare_context();
        track(&ctx, "research", json!({}), |_outer| {
            track(&ctx, "search", json!({}), |_| Ok(()))?;
            track(&ctx, "evaluate_results", json!({}), |_| Ok(()))?;
            Ok(())
        })
        .unwrap();

        let calls = ctx.tool_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].tool, "research");
        assert_eq!(calls[0].children, vec![1, 2]);
        assert!(calls[1].children.is_empty());
    }

    #[test]
    fn parent_scope_restored_after_error() {
        let ctx = bare_context();
        let _ = track(&ctx, "outer", json!({}), |_| {
            let _ = track(&ctx, "failing", json!({}), |_| {
                Err::<(), _>(Error::Http("x".into()))
            });
            Ok(())
        });
        // A fresh top-level call attaches to no parent.
        track(&ctx, "later", json!({}), |_| Ok(())).unwrap();
        let calls = ctx.tool_calls();
        assert_eq!(calls[0].children, vec![1]);
        assert!(!calls[0].children.contains(&2));
    }
}
