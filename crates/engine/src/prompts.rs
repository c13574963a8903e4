//! Prompt construction for the iteration loop.
//!
//! The per-iteration user message is rebuilt every turn and always embeds
//! the original root prompt verbatim — re-anchoring the model on every
//! iteration is what keeps long loops from drifting onto side quests.

/// Generic instruction used when no root prompt was supplied.
pub const USER_PROMPT: &str = "Continue working toward an answer. Execute code in ```repl \
blocks to use your tools, or finish with FINAL(<answer>) or FINAL_VAR(<variable>) on its \
own line.";

/// Injected after two consecutive iterations without any code fragment.
pub const NUDGE_MESSAGE: &str = "You have not executed any code in your last two \
responses. Reasoning alone cannot gather evidence: run your tools inside a ```repl block, \
or finish now with FINAL(<answer>) / FINAL_VAR(<variable>) if you already have the answer.";

/// Fallback request when the budget runs out without a sentinel.
pub const FALLBACK_PROMPT: &str = "Please provide a final answer to the user's question \
based on the information provided.";

/// Build the user message for iteration `iteration`.
///
/// `context_count` and `history_count` are annotated for persistent
/// sessions so the model knows about bound payloads and prior turns.
pub fn build_user_prompt(
    root_prompt: Option<&str>,
    iteration: usize,
    context_count: usize,
    history_count: usize,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if iteration > 0 {
        parts.push(
            "The history before this message contains your prior iterations: your \
             responses, the code you ran, and its output."
                .into(),
        );
    }

    match root_prompt {
        Some(root) if !root.is_empty() => {
            parts.push(format!(
                "Your original prompt is:\n\"{root}\"\n\nAnswer this question and no \
                 other. Do not drift to related topics."
            ));
            if iteration == 0 {
                parts.push(
                    "You have not interacted with the sandbox yet. Start by gathering \
                     evidence."
                        .into(),
                );
            }
        }
        _ => parts.push(USER_PROMPT.into()),
    }

    if context_count > 0 {
        let names = if context_count == 1 {
            "`context`".to_string()
        } else {
            format!("`context`, `context_1`, … `context_{}`", context_count - 1)
        };
        parts.push(format!(
            "{context_count} contexts available in the sandbox as {names}."
        ));
    }

    if history_count == 1 {
        parts.push("There is 1 prior conversation history in this session.".into());
    } else if history_count > 1 {
        parts.push(format!(
            "There are {history_count} prior conversation histories in this session."
        ));
    }

    parts.join("\n\n")
}

/// Build the one-off fallback message used when the iteration budget is
/// exhausted. Anchored to the original question when one was supplied.
pub fn build_fallback_prompt(root_prompt: Option<&str>) -> String {
    match root_prompt {
        Some(root) if !root.is_empty() => format!(
            "You are out of iterations. Based on everything gathered so far, provide \
             your final answer to the original question:\n\"{root}\""
        ),
        _ => FALLBACK_PROMPT.to_string(),
    }
}
