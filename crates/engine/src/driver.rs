//! The bounded reasoning loop.
//!
//! Each iteration prompts the LM, extracts ```repl fragments from the
//! response, executes them sequentially in the shared sandbox, and checks
//! the response for a terminating sentinel. Two circuit breakers keep
//! degenerate loops cheap: consecutive runtime errors inside one iteration
//! skip the remaining fragments, and two consecutive iterations without
//! any code inject a nudge into the next prompt.
//!
//! The driver itself carries only the budget and breaker counters — all
//! real state lives in the sandbox, which is what makes persistent
//! multi-turn sessions work.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use braid_domain::error::Result;
use braid_domain::{ChatMessage, CodeBlock, IterationRecord, LmHandler, ReplResult, RunMetadata};
use regex::Regex;

use crate::bus::BusHandle;
use crate::prompts;
use crate::sandbox::Sandbox;

/// Consecutive runtime errors within one iteration before the rest of the
/// iteration's fragments are skipped.
const CASCADE_ERROR_LIMIT: usize = 2;
/// Consecutive code-less iterations before the nudge fires.
const EMPTY_ITERATION_LIMIT: usize = 2;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logger seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Observer for driver output. The streaming logger bridges these calls
/// onto the bus and the JSONL audit file; the child variant re-labels
/// iterations as `sub_iteration` on the parent bus.
pub trait DriverLogger: Send + Sync {
    fn log_metadata(&self, meta: &RunMetadata);
    fn log_iteration(&self, record: &IterationRecord);
}

/// Logger that drops everything (bare drivers in tests).
pub struct NullLogger;

impl DriverLogger for NullLogger {
    fn log_metadata(&self, _meta: &RunMetadata) {}
    fn log_iteration(&self, _record: &IterationRecord) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one `run` call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The final answer. `None` never escapes `run` — the fallback
    /// completion fills it when the budget ran out.
    pub response: Option<String>,
    pub iterations: usize,
    pub execution_time: f64,
}

pub struct Driver {
    sandbox: Sandbox,
    lm: Arc<dyn LmHandler>,
    bus: BusHandle,
    max_iterations: usize,
    system_prompt: String,
    /// Conversation carried across runs on a persistent session
    /// (everything except the system message).
    history: Vec<ChatMessage>,
    prior_runs: usize,
}

impl Driver {
    pub fn new(
        sandbox: Sandbox,
        lm: Arc<dyn LmHandler>,
        bus: BusHandle,
        max_iterations: usize,
        system_prompt: String,
    ) -> Self {
        Self {
            sandbox,
            lm,
            bus,
            max_iterations,
            system_prompt,
            history: Vec::new(),
            prior_runs: 0,
        }
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    pub fn sandbox_mut(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }

    /// Run the loop to completion for one search.
    ///
    /// Fails with `Error::Cancelled` when the bus is cancelled at an
    /// iteration boundary, and with the LM error when a root completion
    /// call fails; the worker translates both into terminal events.
    pub fn run(
        &mut self,
        root_prompt: &str,
        context: Option<serde_json::Value>,
        logger: &dyn DriverLogger,
    ) -> Result<Completion> {
        let started = Instant::now();
        let root = (!root_prompt.is_empty()).then_some(root_prompt);

        if let Some(payload) = context {
            self.sandbox.bind_context(payload)?;
        }

        let mut messages = vec![ChatMessage::system(&self.system_prompt)];
        messages.extend(self.history.iter().cloned());

        let mut consecutive_empty = 0usize;
        let mut pending_note: Option<String> = None;
        let mut iterations_run = 0usize;

        for iteration in 0..self.max_iterations {
            self.bus.raise_if_cancelled()?;

            // ── Build the user message (anchored every iteration) ──
            let mut user_content = prompts::build_user_prompt(
                root,
                iteration,
                self.sandbox.context_count(),
                self.prior_runs,
            );
            if let Some(note) = pending_note.take() {
                user_content = format!("{note}\n\n{user_content}");
            }
            messages.push(ChatMessage::user(&user_content));

            // ── LM call ────────────────────────────────────────────
            let iter_started = Instant::now();
            let response = self.lm.completion(&messages)?;
            messages.push(ChatMessage::assistant(&response));

            // ── Execute fragments ──────────────────────────────────
            let code_blocks = self.execute_fragments(&response);

            if !code_blocks.is_empty() {
                messages.push(ChatMessage::user(render_execution_results(&code_blocks)));
            }

            // ── Sentinel detection ─────────────────────────────────
            let final_answer = match detect_sentinel(&response) {
                Some(Sentinel::Literal(text)) => Some(text),
                Some(Sentinel::Variable(name)) => match self.sandbox.get_var(&name) {
                    Some(value) => Some(value),
                    None => {
                        tracing::warn!(variable = %name, "FINAL_VAR names an undefined variable");
                        pending_note = Some(format!(
                            "FINAL_VAR({name}) failed: no variable named `{name}` exists in \
                             the sandbox. Define it first, or use FINAL(<text>)."
                        ));
                        None
                    }
                },
                None => None,
            };

            let record = IterationRecord {
                prompt: user_content,
                response: response.clone(),
                code_blocks,
                final_answer: final_answer.clone(),
                iteration_time: iter_started.elapsed().as_secs_f64(),
            };
            logger.log_iteration(&record);
            iterations_run = iteration + 1;

            if let Some(answer) = final_answer {
                self.finish_run(messages);
                return Ok(Completion {
                    response: Some(answer),
                    iterations: iterations_run,
                    execution_time: started.elapsed().as_secs_f64(),
                });
            }

            // ── Empty-iteration breaker ────────────────────────────
            if record.code_blocks.is_empty() {
                consecutive_empty += 1;
                if consecutive_empty == EMPTY_ITERATION_LIMIT {
                    pending_note = Some(prompts::NUDGE_MESSAGE.to_string());
                    consecutive_empty = 0;
                }
            } else {
                consecutive_empty = 0;
            }
        }

        // ── Budget exhausted: one anchored fallback completion ─────
        self.bus.raise_if_cancelled()?;
        messages.push(ChatMessage::user(prompts::build_fallback_prompt(root)));
        let answer = self.lm.completion(&messages)?;
        messages.push(ChatMessage::assistant(&answer));
        self.finish_run(messages);

        Ok(Completion {
            response: Some(answer),
            iterations: iterations_run,
            execution_time: started.elapsed().as_secs_f64(),
        })
    }

    /// Carry the conversation (minus the system message) into the next
    /// run on this session.
    fn finish_run(&mut self, messages: Vec<ChatMessage>) {
        self.history = messages.into_iter().skip(1).collect();
        self.prior_runs += 1;
    }

    /// Execute the response's fragments in order, applying the cascade
    /// breaker: a syntax error skips everything after it, and
    /// `CASCADE_ERROR_LIMIT` consecutive runtime errors skip the rest of
    /// the iteration. A successful fragment resets the error streak.
    fn execute_fragments(&mut self, response: &str) -> Vec<CodeBlock> {
        let mut blocks = Vec::new();
        let mut consecutive_errors = 0usize;
        let mut skip_reason: Option<&'static str> = None;

        for code in extract_fragments(response) {
            if let Some(reason) = skip_reason {
                blocks.push(CodeBlock {
                    code,
                    result: ReplResult::skipped(reason),
                });
                continue;
            }

            let result = self.sandbox.execute(&code);

            if result.is_syntax_error() {
                skip_reason = Some("syntax error in an earlier block");
            } else if result.is_error() {
                consecutive_errors += 1;
                if consecutive_errors >= CASCADE_ERROR_LIMIT {
                    skip_reason =
                        Some("cascading errors, two consecutive blocks failed");
                }
            } else {
                consecutive_errors = 0;
            }

            blocks.push(CodeBlock { code, result });
        }

        blocks
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn fragment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?ms)^```repl[ \t]*\r?\n(.*?)^```[ \t]*$").unwrap())
}

/// All ```repl fenced fragments, in order.
pub fn extract_fragments(response: &str) -> Vec<String> {
    fragment_re()
        .captures_iter(response)
        .map(|c| c[1].trim_end().to_string())
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum Sentinel {
    Literal(String),
    Variable(String),
}

/// Find a terminating sentinel: `FINAL(...)` or `FINAL_VAR(name)` at a
/// line start, outside code fences.
pub fn detect_sentinel(response: &str) -> Option<Sentinel> {
    static VAR_RE: OnceLock<Regex> = OnceLock::new();
    let var_re = VAR_RE
        .get_or_init(|| Regex::new(r"^FINAL_VAR\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*$").unwrap());
    static LIT_RE: OnceLock<Regex> = OnceLock::new();
    let lit_re = LIT_RE.get_or_init(|| Regex::new(r"^FINAL\((.*)\)\s*$").unwrap());

    let mut in_fence = false;
    for line in response.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = var_re.captures(line) {
            return Some(Sentinel::Variable(caps[1].to_string()));
        }
        if let Some(caps) = lit_re.captures(line) {
            return Some(Sentinel::Literal(strip_quotes(caps[1].trim()).to_string()));
        }
    }
    None
}

fn strip_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &text[1..text.len() - 1];
        }
    }
    text
}

/// Render fragment results the way the LM sees them in history.
fn render_execution_results(blocks: &[CodeBlock]) -> String {
    let mut out = String::from("Execution results:");
    for (i, block) in blocks.iter().enumerate() {
        out.push_str(&format!("\n--- block {} ---\n", i + 1));
        if !block.result.stdout.is_empty() {
            out.push_str(&block.result.stdout);
        }
        if !block.result.stderr.is_empty() {
            out.push_str(&format!("[stderr] {}\n", block.result.stderr));
        }
        if block.result.stdout.is_empty() && block.result.stderr.is_empty() {
            out.push_str("(no output)\n");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusHandle, EventBus};
    use crate::sandbox::SandboxBuilder;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    // ── Fakes ─────────────────────────────────────────────────────

    /// LM that replays scripted responses and captures every prompt.
    struct ScriptedLm {
        responses: Mutex<VecDeque<String>>,
        seen_prompts: Mutex<Vec<String>>,
        cancel_after: Option<(usize, Arc<EventBus>)>,
    }

    impl ScriptedLm {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                seen_prompts: Mutex::new(Vec::new()),
                cancel_after: None,
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.seen_prompts.lock().clone()
        }
    }

    impl LmHandler for ScriptedLm {
        fn completion(&self, messages: &[ChatMessage]) -> Result<String> {
            let user = messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, braid_domain::Role::User))
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.seen_prompts.lock().push(user);

            if let Some((after, bus)) = &self.cancel_after {
                if self.seen_prompts.lock().len() >= *after {
                    bus.cancel();
                }
            }

            Ok(self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| "FINAL(out of script)".into()))
        }

        fn completion_batched(&self, prompts: &[String]) -> Vec<String> {
            prompts.iter().map(|_| String::new()).collect()
        }
    }

    /// Logger that captures iteration records.
    #[derive(Default)]
    struct RecordingLogger {
        records: Mutex<Vec<IterationRecord>>,
    }

    impl DriverLogger for RecordingLogger {
        fn log_metadata(&self, _meta: &RunMetadata) {}
        fn log_iteration(&self, record: &IterationRecord) {
            self.records.lock().push(record.clone());
        }
    }

    fn driver_with(lm: Arc<ScriptedLm>, max_iterations: usize) -> (Driver, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let sandbox = SandboxBuilder::new().build("").unwrap();
        let driver = Driver::new(
            sandbox,
            lm,
            BusHandle::new(bus.clone()),
            max_iterations,
            "test system prompt".into(),
        );
        (driver, bus)
    }

    // ── Parsing ───────────────────────────────────────────────────

    #[test]
    fn extracts_repl_fragments_in_order() {
        let response = "text\n```repl\nlet a = 1;\n```\nmore\n```repl\nprint(a);\n```\n";
        let frags = extract_fragments(response);
        assert_eq!(frags, vec!["let a = 1;", "print(a);"]);
    }

    #[test]
    fn ignores_non_repl_fences() {
        let response = "```python\nx = 1\n```\n```repl\nlet y = 2;\n```";
        let frags = extract_fragments(response);
        assert_eq!(frags, vec!["let y = 2;"]);
    }

    #[test]
    fn sentinel_must_start_a_line_outside_fences() {
        assert_eq!(
            detect_sentinel("done.\nFINAL(the answer)\n"),
            Some(Sentinel::Literal("the answer".into()))
        );
        assert_eq!(
            detect_sentinel("FINAL_VAR(answer)"),
            Some(Sentinel::Variable("answer".into()))
        );
        // Inside a fence: not a sentinel.
        assert_eq!(detect_sentinel("```repl\nFINAL(no)\n```\n"), None);
        // Mid-line: not a sentinel.
        assert_eq!(detect_sentinel("I will call FINAL(x) soon"), None);
    }

    #[test]
    fn final_literal_strips_matching_quotes() {
        assert_eq!(
            detect_sentinel("FINAL(\"quoted\")"),
            Some(Sentinel::Literal("quoted".into()))
        );
    }

    // ── Loop behavior ─────────────────────────────────────────────

    #[test]
    fn terminates_on_final_literal() {
        let lm = Arc::new(ScriptedLm::new(&[
            "```repl\nlet x = 1;\n```",
            "FINAL(all done)",
        ]));
        let (mut driver, _bus) = driver_with(lm, 10);
        let logger = RecordingLogger::default();
        let completion = driver.run("question", None, &logger).unwrap();
        assert_eq!(completion.response.as_deref(), Some("all done"));
        assert_eq!(completion.iterations, 2);
        let records = logger.records.lock();
        assert!(records[0].final_answer.is_none());
        assert_eq!(records[1].final_answer.as_deref(), Some("all done"));
    }

    #[test]
    fn final_var_resolves_from_sandbox() {
        let lm = Arc::new(ScriptedLm::new(&[
            "```repl\nlet answer = \"resolved text\";\n```\nFINAL_VAR(answer)",
        ]));
        let (mut driver, _bus) = driver_with(lm, 5);
        let completion = driver.run("q", None, &NullLogger).unwrap();
        assert_eq!(completion.response.as_deref(), Some("resolved text"));
    }

    #[test]
    fn final_var_on_missing_variable_does_not_terminate() {
        let lm = Arc::new(ScriptedLm::new(&["FINAL_VAR(ghost)", "FINAL(recovered)"]));
        let (mut driver, _bus) = driver_with(lm.clone(), 5);
        let completion = driver.run("q", None, &NullLogger).unwrap();
        assert_eq!(completion.response.as_deref(), Some("recovered"));
        // The failure is surfaced to the model on the next turn.
        assert!(lm.prompts()[1].contains("FINAL_VAR(ghost) failed"));
    }

    #[test]
    fn cascade_skips_after_two_consecutive_runtime_errors() {
        // Five fragments: ok, error, error, skip, skip.
        let lm = Arc::new(ScriptedLm::new(&[
            "```repl\nprint(\"ok\");\n```\n\
             ```repl\nresults_main\n```\n\
             ```repl\nresults_main\n```\n\
             ```repl\nresults_main\n```\n\
             ```repl\nresults_main\n```",
            "FINAL(done)",
        ]));
        let (mut driver, _bus) = driver_with(lm, 5);
        let logger = RecordingLogger::default();
        driver.run("q", None, &logger).unwrap();

        let records = logger.records.lock();
        let blocks = &records[0].code_blocks;
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].result.stdout, "ok\n");
        assert!(blocks[1].result.stderr.starts_with("VariableNotFound"));
        assert!(blocks[2].result.stderr.starts_with("VariableNotFound"));
        assert!(blocks[3].result.stderr.starts_with("[Skipped:"));
        assert!(blocks[3].result.stderr.contains("cascading"));
        assert!(blocks[4].result.stderr.starts_with("[Skipped:"));
    }

    #[test]
    fn success_between_errors_resets_cascade_counter() {
        let lm = Arc::new(ScriptedLm::new(&[
            "```repl\nbad1\n```\n\
             ```repl\nprint(\"good\");\n```\n\
             ```repl\nbad2\n```\n\
             ```repl\nbad3\n```",
            "FINAL(done)",
        ]));
        let (mut driver, _bus) = driver_with(lm, 5);
        let logger = RecordingLogger::default();
        driver.run("q", None, &logger).unwrap();

        let records = logger.records.lock();
        let blocks = &records[0].code_blocks;
        // All four executed: the success at index 1 reset the streak, so
        // index 3 is only the second consecutive error (executed, and it
        // would have armed the skip for a fifth block).
        assert!(blocks[1].result.stderr.is_empty());
        for b in [&blocks[0], &blocks[2], &blocks[3]] {
            assert!(b.result.stderr.starts_with("VariableNotFound"), "{}", b.result.stderr);
        }
    }

    #[test]
    fn syntax_error_skips_rest_immediately() {
        let lm = Arc::new(ScriptedLm::new(&[
            "```repl\nlet x = ;\n```\n```repl\nprint(\"never\");\n```",
            "FINAL(done)",
        ]));
        let (mut driver, _bus) = driver_with(lm, 5);
        let logger = RecordingLogger::default();
        driver.run("q", None, &logger).unwrap();

        let records = logger.records.lock();
        let blocks = &records[0].code_blocks;
        assert!(blocks[0].result.is_syntax_error());
        assert!(blocks[1].result.stderr.starts_with("[Skipped:"));
        assert!(blocks[1].result.stderr.contains("syntax error"));
    }

    #[test]
    fn nudge_after_two_empty_iterations() {
        let lm = Arc::new(ScriptedLm::new(&[
            "thinking...",
            "still thinking...",
            "FINAL(done)",
        ]));
        let (mut driver, _bus) = driver_with(lm.clone(), 10);
        let completion = driver.run("q", None, &NullLogger).unwrap();
        assert_eq!(completion.response.as_deref(), Some("done"));

        let prompts = lm.prompts();
        assert!(!prompts[0].contains("You have not executed any code"));
        assert!(!prompts[1].contains("You have not executed any code"));
        assert!(prompts[2].contains("You have not executed any code"));
    }

    #[test]
    fn code_iteration_resets_empty_counter() {
        let lm = Arc::new(ScriptedLm::new(&[
            "empty",
            "```repl\nlet a = 1;\n```",
            "empty",
            "```repl\nlet b = 2;\n```",
            "FINAL(done)",
        ]));
        let (mut driver, _bus) = driver_with(lm.clone(), 10);
        driver.run("q", None, &NullLogger).unwrap();
        for p in lm.prompts() {
            assert!(!p.contains("You have not executed any code"));
        }
    }

    #[test]
    fn repeated_empty_cycles_nudge_again() {
        let lm = Arc::new(ScriptedLm::new(&[
            "e1", "e2", "e3", "e4", "FINAL(done)",
        ]));
        let (mut driver, _bus) = driver_with(lm.clone(), 10);
        driver.run("q", None, &NullLogger).unwrap();
        let nudges = lm
            .prompts()
            .iter()
            .filter(|p| p.contains("You have not executed any code"))
            .count();
        // After iterations 2 and 4.
        assert_eq!(nudges, 2);
    }

    #[test]
    fn root_prompt_anchors_every_iteration() {
        let lm = Arc::new(ScriptedLm::new(&["a", "b", "c", "FINAL(done)"]));
        let (mut driver, _bus) = driver_with(lm.clone(), 10);
        driver
            .run("How do I perform ghusl janabah?", None, &NullLogger)
            .unwrap();
        let prompts = lm.prompts();
        assert_eq!(prompts.len(), 4);
        for p in &prompts {
            assert!(p.contains("How do I perform ghusl janabah?"));
        }
    }

    #[test]
    fn cancellation_before_iteration_unwinds() {
        let bus = Arc::new(EventBus::new());
        let mut scripted =
            ScriptedLm::new(&["```repl\nlet a=1;\n```", "```repl\nlet b=2;\n```", "x"]);
        scripted.cancel_after = Some((2, bus.clone()));
        let lm = Arc::new(scripted);

        let sandbox = SandboxBuilder::new().build("").unwrap();
        let mut driver = Driver::new(
            sandbox,
            lm.clone(),
            BusHandle::new(bus.clone()),
            10,
            "sys".into(),
        );
        let logger = RecordingLogger::default();
        let err = driver.run("q", None, &logger).unwrap_err();
        assert!(err.is_cancelled());
        // Two iterations ran, the third never started.
        assert_eq!(logger.records.lock().len(), 2);
        assert_eq!(lm.prompts().len(), 2);
    }

    #[test]
    fn budget_exhaustion_triggers_anchored_fallback() {
        let lm = Arc::new(ScriptedLm::new(&[
            "```repl\nlet a = 1;\n```",
            "```repl\nlet b = 2;\n```",
            "fallback answer",
        ]));
        let (mut driver, _bus) = driver_with(lm.clone(), 2);
        let completion = driver.run("What is riba?", None, &NullLogger).unwrap();
        assert_eq!(completion.response.as_deref(), Some("fallback answer"));
        assert_eq!(completion.iterations, 2);
        let prompts = lm.prompts();
        assert!(prompts[2].contains("original question"));
        assert!(prompts[2].contains("What is riba?"));
    }

    #[test]
    fn follow_up_runs_note_prior_history() {
        let lm = Arc::new(ScriptedLm::new(&["FINAL(one)", "FINAL(two)"]));
        let (mut driver, _bus) = driver_with(lm.clone(), 5);
        driver.run("first", None, &NullLogger).unwrap();
        driver.run("second", None, &NullLogger).unwrap();
        let prompts = lm.prompts();
        assert!(!prompts[0].contains("prior conversation"));
        assert!(prompts[1].contains("1 prior conversation history"));
    }

    #[test]
    fn sandbox_state_survives_across_runs() {
        let lm = Arc::new(ScriptedLm::new(&[
            "```repl\nlet carried = 11;\n```\nFINAL(one)",
            "```repl\nprint(carried);\n```\nFINAL(two)",
        ]));
        let (mut driver, _bus) = driver_with(lm, 5);
        driver.run("first", None, &NullLogger).unwrap();
        let logger = RecordingLogger::default();
        driver.run("second", None, &logger).unwrap();
        let records = logger.records.lock();
        assert_eq!(records[0].code_blocks[0].result.stdout, "11\n");
    }
}
