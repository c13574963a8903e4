//! The sandboxed interpreter the LM's code fragments run in.
//!
//! Backed by an embedded rhai engine with a persistent scope: variables
//! defined by one fragment are visible to the next, and tool functions are
//! registered into the engine before bootstrap. Script output is captured
//! through the engine's print hook into a shared [`OutputBuffer`] that the
//! tool layer also writes to, so tool logs and `print()` interleave the way
//! they do on a terminal.
//!
//! Uncaught script errors are captured into `ReplResult.stderr` as
//! `Class: message` and never propagate out of [`Sandbox::execute`]. The
//! one exception is bootstrap: a failing `setup_code` fails `build()` with
//! `Error::SetupCode` and no sandbox value exists afterward.

use std::sync::Arc;
use std::time::Instant;

use braid_domain::error::{Error, Result};
use braid_domain::{LmCallRecord, ReplResult};
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::Value;

/// Keeps runaway scripts from wedging the worker.
const MAX_OPERATIONS: u64 = 5_000_000;
const MAX_CALL_LEVELS: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared capture channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Captured stdout shared between the script's `print()` and the tools.
#[derive(Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line (newline added).
    pub fn line(&self, text: &str) {
        let mut buf = self.inner.lock();
        buf.push_str(text);
        buf.push('\n');
    }

    /// Return the captured output and clear the buffer.
    pub fn take(&self) -> String {
        std::mem::take(&mut self.inner.lock())
    }
}

/// Sink for LM calls made from inside the sandbox, drained into each
/// fragment's `ReplResult.nested_calls`.
#[derive(Clone, Default)]
pub struct CallSink {
    inner: Arc<Mutex<Vec<LmCallRecord>>>,
}

impl CallSink {
    pub fn record(&self, prompt: &str, response: &str, execution_time: f64) {
        self.inner.lock().push(LmCallRecord {
            prompt: prompt.to_string(),
            response: response.to_string(),
            execution_time,
        });
    }

    fn drain(&self) -> Vec<LmCallRecord> {
        std::mem::take(&mut self.inner.lock())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configures the engine (tool registration, context payloads) before the
/// one-shot bootstrap. `build` consumes the builder, so a sandbox cannot
/// exist half-constructed.
pub struct SandboxBuilder {
    engine: Engine,
    scope: Scope<'static>,
    output: OutputBuffer,
    calls: CallSink,
}

impl SandboxBuilder {
    pub fn new() -> Self {
        let output = OutputBuffer::new();
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);

        let print_buf = output.clone();
        engine.on_print(move |text| print_buf.line(text));
        let debug_buf = output.clone();
        engine.on_debug(move |text, _, _| debug_buf.line(text));

        // Sentinel helpers. They only pass the value through — the driver
        // recognizes FINAL/FINAL_VAR textually in the response, outside
        // code fences.
        engine.register_fn("FINAL", |v: Dynamic| v.to_string());
        engine.register_fn("FINAL_VAR", |v: Dynamic| v.to_string());

        Self {
            engine,
            scope: Scope::new(),
            output,
            calls: CallSink::default(),
        }
    }

    /// The engine, for tool registration.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// The shared stdout buffer (hand a clone to the tool layer).
    pub fn output(&self) -> OutputBuffer {
        self.output.clone()
    }

    /// The nested-LM-call sink (hand a clone to the tool layer).
    pub fn call_sink(&self) -> CallSink {
        self.calls.clone()
    }

    /// Bind a value directly into the scope (pre-bootstrap).
    pub fn set_var(&mut self, name: &str, value: Dynamic) {
        self.scope.set_value(name.to_string(), value);
    }

    /// Run `setup_code` exactly once and return the live sandbox.
    ///
    /// Any failure — parse or runtime — aborts construction with
    /// `Error::SetupCode` carrying the captured stderr.
    pub fn build(mut self, setup_code: &str) -> Result<Sandbox> {
        if !setup_code.trim().is_empty() {
            if let Err(err) = self
                .engine
                .run_with_scope(&mut self.scope, setup_code)
            {
                let stderr = render_error(&err);
                self.output.take();
                return Err(Error::SetupCode { stderr });
            }
        }
        // Bootstrap output is not part of any iteration.
        self.output.take();

        Ok(Sandbox {
            engine: self.engine,
            scope: self.scope,
            output: self.output,
            calls: self.calls,
            context_count: 0,
        })
    }
}

impl Default for SandboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live interpreter instance. All resources release on drop.
pub struct Sandbox {
    engine: Engine,
    scope: Scope<'static>,
    output: OutputBuffer,
    calls: CallSink,
    context_count: usize,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("context_count", &self.context_count)
            .finish()
    }
}

impl Sandbox {
    /// Execute one code fragment.
    ///
    /// Captures stdout, stderr, a filtered locals snapshot, wall-clock
    /// time, and any LM calls the fragment made. Script errors land in
    /// `stderr`; this method itself does not fail.
    pub fn execute(&mut self, code: &str) -> ReplResult {
        let start = Instant::now();
        self.output.take();

        let stderr = match self
            .engine
            .run_with_scope(&mut self.scope, code)
        {
            Ok(()) => String::new(),
            Err(err) => render_error(&err),
        };

        ReplResult {
            stdout: self.output.take(),
            stderr,
            locals: self.locals_snapshot(),
            execution_time: start.elapsed().as_secs_f64(),
            nested_calls: self.calls.drain(),
        }
    }

    /// Serializable snapshot of the scope. Names starting with an
    /// underscore are plumbing and stay out of the LM's view, though the
    /// variables themselves remain reachable by later fragments.
    pub fn locals_snapshot(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, _, value) in self.scope.iter() {
            if name.starts_with('_') {
                continue;
            }
            map.insert(name.to_string(), serialize_dynamic(name, &value));
        }
        Value::Object(map)
    }

    /// Current string form of a scope variable, for `FINAL_VAR`.
    pub fn get_var(&self, name: &str) -> Option<String> {
        let value = self.scope.get_value::<Dynamic>(name)?;
        if value.is_string() {
            value.into_string().ok()
        } else {
            Some(value.to_string())
        }
    }

    /// Bind a context payload. The first payload is `context`, follow-up
    /// payloads (persistent sessions) are `context_1`, `context_2`, ….
    pub fn bind_context(&mut self, value: Value) -> Result<String> {
        let name = if self.context_count == 0 {
            "context".to_string()
        } else {
            format!("context_{}", self.context_count)
        };
        let dynamic: Dynamic = rhai::serde::to_dynamic(value)
            .map_err(|e| Error::Other(format!("context payload: {e}")))?;
        self.scope.set_value(name.clone(), dynamic);
        self.context_count += 1;
        Ok(name)
    }

    pub fn context_count(&self) -> usize {
        self.context_count
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error / value rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render a script failure as `Class: message`. Parse failures get the
/// `SyntaxError` class the driver keys its immediate-skip behavior on.
fn render_error(err: &EvalAltResult) -> String {
    let class = match err {
        EvalAltResult::ErrorParsing(..) => "SyntaxError",
        EvalAltResult::ErrorVariableNotFound(..) => "VariableNotFound",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorPropertyNotFound(..) => "PropertyNotFound",
        EvalAltResult::ErrorIndexNotFound(..) => "IndexNotFound",
        EvalAltResult::ErrorMismatchDataType(..) | EvalAltResult::ErrorMismatchOutputType(..) => {
            "TypeError"
        }
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorArrayBounds(..) | EvalAltResult::ErrorStringBounds(..) => {
            "BoundsError"
        }
        EvalAltResult::ErrorTooManyOperations(..) => "BudgetExceeded",
        _ => "RuntimeError",
    };
    format!("{class}: {err}")
}

/// Best-effort JSON form of a scope value; callables and other opaque
/// types fall back to a `<type 'name'>` tag.
fn serialize_dynamic(name: &str, value: &Dynamic) -> Value {
    if value.is::<rhai::FnPtr>() {
        return Value::String(format!("<fn '{name}'>"));
    }
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(_) => Value::String(format!("<{} '{}'>", value.type_name(), name)),
    }
}
