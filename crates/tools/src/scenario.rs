//! End-to-end loop test: a scripted LM drives the real driver, sandbox,
//! and tool suite against a fake retrieval API.

use std::sync::Arc;

use braid_engine::sandbox::SandboxBuilder;
use braid_engine::{BusHandle, Driver, EventBus, NullLogger, READY_THRESHOLD};

use crate::context::test_support::{raw_context, FakeCascade, FakeLm};
use crate::context::SearchContext;
use crate::install::{install_tools, setup_code, system_prompt};

fn build_driver(
    api: Arc<FakeCascade>,
    lm: Arc<FakeLm>,
) -> (Driver, Arc<SearchContext>, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let bus_handle = BusHandle::new(bus.clone());

    let mut builder = SandboxBuilder::new();
    let mut inner = raw_context(api, lm.clone());
    inner.bus = bus_handle.clone();
    inner.output = builder.output();
    inner.calls = builder.call_sink();
    let ctx = Arc::new(inner);

    install_tools(&mut builder, &ctx);
    let sandbox = builder.build(&setup_code()).unwrap();

    let driver = Driver::new(sandbox, lm, bus_handle, 10, system_prompt(10));
    (driver, ctx, bus)
}

/// Direct hit in a single iteration: research rates three strong hits
/// relevant, progress reports ready, the draft passes critique first
/// try, and `FINAL_VAR(answer)` delivers it.
#[test]
fn direct_hit_single_iteration() {
    let api = Arc::new(FakeCascade::default());
    api.queue_hits(&[("4311", 0.92), ("4312", 0.88), ("880", 0.85)]);

    let lm = Arc::new(FakeLm::default());
    // Iteration 1: the whole workflow in one response.
    lm.push_response(
        r#"Searching, checking progress, then drafting.

```repl
let r = research("how to perform ghusl janabah");
let progress = check_progress();
let draft = draft_answer("How do I perform ghusl janabah?", r.results);
let answer = draft.answer;
print(progress.phase);
```

FINAL_VAR(answer)"#,
    );
    // research -> evaluate_results batch call.
    lm.push_response(
        "[4311] RELEVANT CONFIDENCE:5\n[4312] RELEVANT CONFIDENCE:5\n[880] RELEVANT CONFIDENCE:4",
    );
    // draft_answer synthesis call.
    lm.push_response(
        "## Answer\nWash with intention, then the head and neck, then the body \
         [Source: 4311] [Source: 4312]. Order matters [Source: 880].",
    );
    // Dual critique passes first try.
    lm.push_batched(&["PASS", "PASS"]);

    let (mut driver, ctx, bus) = build_driver(api, lm);
    let completion = driver
        .run("How do I perform ghusl janabah?", None, &NullLogger)
        .unwrap();

    // One iteration, answer from the sandbox variable.
    assert_eq!(completion.iterations, 1);
    let answer = completion.response.unwrap();
    assert!(answer.contains("[Source: 4311]"));

    // The answer cites only registry ids.
    for id in ["4311", "4312", "880"] {
        assert!(ctx.evidence.get(id).is_some());
    }

    // Evidence cleared the ready bar.
    assert!(ctx.quality.confidence(&ctx.evidence) >= READY_THRESHOLD);
    assert_eq!(ctx.quality.last_critique_passed(), Some(true));

    // Tool-call tree: the top level is exactly the three workflow calls.
    let calls = ctx.tool_calls();
    let children_of: Vec<usize> = calls
        .iter()
        .flat_map(|c| c.children.iter().copied())
        .collect();
    let top_level: Vec<&str> = calls
        .iter()
        .enumerate()
        .filter(|(i, _)| !children_of.contains(i))
        .map(|(_, c)| c.tool.as_str())
        .collect();
    assert_eq!(top_level, vec!["research", "check_progress", "draft_answer"]);

    // The bus carries tool and progress traffic; no terminal event yet —
    // emitting `done` is the worker's job.
    assert!(!bus.is_done());
    assert!(!bus.replay().is_empty());
}

/// Follow-up searches reuse the same sandbox: the second run can read
/// variables the first run defined.
#[test]
fn follow_up_reuses_sandbox_state() {
    let api = Arc::new(FakeCascade::default());
    let lm = Arc::new(FakeLm::default());
    lm.push_response("```repl\nlet saved = \"from turn one\";\n```\nFINAL(first done)");
    lm.push_response("```repl\nprint(saved);\n```\nFINAL(second done)");

    let (mut driver, _ctx, _bus) = build_driver(api, lm.clone());
    driver.run("first question", None, &NullLogger).unwrap();
    let completion = driver.run("second question", None, &NullLogger).unwrap();

    assert_eq!(completion.response.as_deref(), Some("second done"));
    // The second run's prompt advertises the prior turn.
    assert!(lm
        .prompts
        .lock()
        .iter()
        .any(|p| p.contains("1 prior conversation history")));
}
