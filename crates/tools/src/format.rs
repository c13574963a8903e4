//! Evidence formatting — pure functions, no context needed.

use braid_domain::Hit;

use crate::api_tools::clip;

/// Format hits as citation lines for synthesis prompts:
/// `[Source: <id>] Q: … A: …`, question capped at 200 chars and answer at
/// 1500, with at most `max_per_source` repeats per id.
pub fn format_evidence(hits: &[Hit], max_per_source: usize) -> Vec<String> {
    let mut seen: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut lines = Vec::new();
    for hit in hits.iter().take(50) {
        let count = seen.entry(hit.id.as_str()).or_insert(0);
        if *count >= max_per_source {
            continue;
        }
        *count += 1;
        lines.push(format!(
            "[Source: {}] Q: {} A: {}",
            hit.id,
            clip(&hit.question, 200),
            clip(&hit.answer, 1500),
        ));
    }
    lines
}
