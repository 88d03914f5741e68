//! Content sanitization between model output and the sandbox.
//!
//! Models wrap file bodies in markdown fences despite instructions, and
//! sandbox output can dwarf a model context window. Both are fixed here,
//! before anything reaches the Arbiter or the next Solve.

use std::sync::OnceLock;

use regex::Regex;

/// Upper bound for the combined stdout+stderr carried into the next Solve.
pub const MAX_FEEDBACK_BYTES: usize = 16 * 1024;

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*)\n(.*?)```").expect("fence pattern is valid")
    })
}

/// Strip surrounding markdown code fences from a file body.
///
/// When multiple fenced blocks exist, the longest one wins — the model
/// sometimes emits a short commentary snippet alongside the real file.
/// Text without fences is returned trimmed and otherwise untouched.
pub fn strip_code_fences(text: &str) -> String {
    let longest = fence_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .max_by_key(|m| m.as_str().len());
    match longest {
        Some(body) => body.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Truncate `text` to at most `max_bytes`, cutting from the middle.
///
/// The head and tail are preserved because that is where test runners put
/// collection errors and assertion summaries.
pub fn truncate_middle(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let marker = format!("\n... [{} bytes truncated] ...\n", text.len() - max_bytes);
    let keep = max_bytes.saturating_sub(marker.len()) / 2;
    let head_end = floor_char_boundary(text, keep);
    let tail_start = ceil_char_boundary(text, text.len() - keep);
    format!("{}{}{}", &text[..head_end], marker, &text[tail_start..])
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}
