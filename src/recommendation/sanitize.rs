// Sanitize clinical free text before it is placed in a prompt, and strip
// model artifacts from what comes back.

use std::sync::LazyLock;

use regex::Regex;

/// Result of input sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    /// Lines dropped as injection attempts.
    pub removed_lines: usize,
    /// Prompt section tags removed from inside kept lines.
    pub removed_tags: usize,
    pub truncated: bool,
}

/// Remove invisible characters, role markers and instruction-override
/// lines, normalize whitespace, and cap the length at `max_chars`.
pub fn sanitize_clinical_text(raw: &str, max_chars: usize) -> SanitizedText {
    let visible = remove_invisible_chars(raw);
    let (cleaned, removed_lines) = remove_injection_lines(&visible);
    let (untagged, removed_tags) = remove_prompt_tags(&cleaned);
    let normalized = normalize_whitespace(&untagged);
    let truncated = normalized.chars().count() > max_chars;
    let text = if truncated {
        truncate_at_word_boundary(&normalized, max_chars)
    } else {
        normalized
    };

    SanitizedText {
        text,
        removed_lines,
        removed_tags,
        truncated,
    }
}

/// Strip model-specific artifacts from raw completion output:
/// thinking blocks, stray `<unusedN>` tokens, and an enclosing code fence.
pub fn strip_model_artifacts(raw: &str) -> String {
    static THINK_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
    static UNUSED_TOKEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

    let mut text = raw.to_string();

    // Gemma thinking prefix: <unusedN>thought\n...
    if let Some(idx) = text.find("<unused") {
        if let Some(offset) = text[idx..].find("thought\n") {
            text = text[idx + offset + "thought\n".len()..].to_string();
        }
    }
    text = THINK_BLOCK_RE.replace_all(&text, "").to_string();
    text = UNUSED_TOKEN_RE.replace_all(&text, "").to_string();

    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
        .map(|inner| inner.split_once('\n').map_or(inner, |(_, body)| body));

    normalize_whitespace(unfenced.unwrap_or(trimmed))
}

/// Remove zero-width, directional and other invisible characters, plus
/// control characters other than newline and tab.
fn remove_invisible_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(
                *c,
                '\u{200B}'..='\u{200F}'
                    | '\u{202A}'..='\u{202E}'
                    | '\u{2060}'..='\u{2064}'
                    | '\u{2066}'..='\u{2069}'
                    | '\u{FEFF}'
                    | '\u{00AD}'
            )
        })
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn is_role_marker(trimmed: &str) -> bool {
    const MARKERS: &[&str] = &[
        "system:",
        "assistant:",
        "user:",
        "[system]",
        "[assistant]",
        "[inst]",
        "[/inst]",
        "<<sys>>",
        "<|im_start|>",
        "<|im_end|>",
        "note to ai:",
        "instructions:",
    ];
    MARKERS.iter().any(|m| trimmed.starts_with(m))
}

fn is_override_attempt(text: &str) -> bool {
    static OVERRIDE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\b(?:ignore|disregard|forget)\s+(?:all\s+|any\s+|your\s+|the\s+)?(?:previous|prior|above|earlier)?\s*(?:instructions?|rules?|prompts?)\b|\bnew\s+instructions?:|\byou\s+are\s+now\s+(?:a|an)\b",
        )
        .expect("valid regex")
    });
    OVERRIDE_RE.is_match(text)
}

fn is_instruction_tag(trimmed: &str) -> bool {
    trimmed.starts_with("<instruction")
        || trimmed.starts_with("</instruction")
        || trimmed.starts_with("<system")
        || trimmed.starts_with("</system")
        || trimmed.starts_with("</symptoms")
        || trimmed.starts_with("</condition")
        || trimmed.starts_with("</patient_context")
}

/// Strip tags naming a prompt section wherever they appear, so user text
/// cannot close its own block or open a new one.
fn remove_prompt_tags(text: &str) -> (String, usize) {
    static PROMPT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<\s*/?\s*(?:symptoms|condition|patient_context|system|instructions?)\b[^>]*>")
            .expect("valid regex")
    });
    let count = PROMPT_TAG_RE.find_iter(text).count();
    if count == 0 {
        return (text.to_string(), 0);
    }
    (PROMPT_TAG_RE.replace_all(text, " ").into_owned(), count)
}

/// Drop lines that look like prompt injection. Returns the kept text and
/// the number of dropped lines.
fn remove_injection_lines(text: &str) -> (String, usize) {
    let mut kept = Vec::new();
    let mut removed = 0usize;

    for line in text.lines() {
        let lowered = line.trim().to_lowercase();
        if is_role_marker(&lowered) || is_override_attempt(&lowered) || is_instruction_tag(&lowered) {
            removed += 1;
            continue;
        }
        kept.push(line);
    }

    (kept.join("\n"), removed)
}

/// Collapse runs of spaces inside lines, trim lines, and keep at most one
/// blank line in a row.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut prev_blank = true;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !prev_blank {
                lines.push(String::new());
                prev_blank = true;
            }
        } else {
            lines.push(collapsed);
            prev_blank = false;
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

/// Truncate to at most `max_chars` characters, preferring a word boundary.
fn truncate_at_word_boundary(text: &str, max_chars: usize) -> String {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(idx, _)| idx);
    let head = &text[..end];
    match head.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => head[..pos].trim_end().to_string(),
        _ => head.to_string(),
    }
}
