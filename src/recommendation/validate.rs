//! Validation of untrusted completion output before it becomes a
//! treatment record.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::cache_key::normalize_request_text;
use super::prompt::SCAFFOLD_MARKERS;
use super::sanitize::strip_model_artifacts;
use super::ValidationError;

/// Length bounds for an acceptable suggestion, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestionLimits {
    pub min_chars: usize,
    pub max_chars: usize,
}

/// Clean `raw` and check that it is a usable suggestion.
///
/// `prompt` and `request_text` are what was sent; an answer that merely
/// repeats either one is rejected. Returns the cleaned text.
pub fn validate_suggestion(
    raw: &str,
    prompt: &str,
    request_text: &str,
    limits: SuggestionLimits,
) -> Result<String, ValidationError> {
    let text = strip_model_artifacts(raw);
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }

    let len = text.chars().count();
    if len < limits.min_chars {
        return Err(ValidationError::TooShort {
            len,
            min: limits.min_chars,
        });
    }
    if len > limits.max_chars {
        return Err(ValidationError::TooLong {
            len,
            max: limits.max_chars,
        });
    }

    if echoes_input(&text, prompt, request_text) {
        return Err(ValidationError::EchoedInput);
    }
    if leaks_scaffolding(&text) {
        return Err(ValidationError::PromptLeak);
    }
    if is_degenerate_repetition(&text) {
        return Err(ValidationError::Repetitive);
    }
    if contains_dosing_instruction(&text) {
        return Err(ValidationError::DosingInstruction);
    }

    Ok(text)
}

fn echoes_input(text: &str, prompt: &str, request_text: &str) -> bool {
    let answer = normalize_request_text(text);
    let request = normalize_request_text(request_text);
    let prompt = normalize_request_text(prompt);

    answer == request || (!prompt.is_empty() && answer.contains(&prompt))
}

fn leaks_scaffolding(text: &str) -> bool {
    let lowered = text.to_lowercase();
    SCAFFOLD_MARKERS
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

/// Degenerate output: the same sentence or line over and over, or a single
/// word dominating a long answer.
fn is_degenerate_repetition(text: &str) -> bool {
    let fragments: Vec<String> = text
        .split(['\n', '.', '!', '?'])
        .map(|f| f.trim().to_lowercase())
        .filter(|f| f.chars().count() >= 8)
        .collect();

    if fragments.len() >= 4 {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for f in &fragments {
            *counts.entry(f.as_str()).or_default() += 1;
        }
        let max_repeat = counts.values().copied().max().unwrap_or(0);
        if max_repeat >= 4 || counts.len() * 2 < fragments.len() {
            return true;
        }
    }

    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() > 3)
        .collect();
    if words.len() >= 20 {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for w in &words {
            *counts.entry(w.as_str()).or_default() += 1;
        }
        if counts.values().any(|&n| n * 2 > words.len()) {
            return true;
        }
    }

    false
}

/// Amounts with a dose unit ("500 mg", "10 units") or counted dose forms
/// ("2 tablets"). Concentrations such as "120 mg/dL" are lab values. A
/// volume ("10 ml") only counts next to a medication cue in the same
/// sentence, so fluid-intake advice passes.
fn contains_dosing_instruction(text: &str) -> bool {
    static DOSE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b\d+(?:[.,]\d+)?\s?(?:mg|mcg|µg|ug|iu|units?)\b(\s*/\s*[a-z]+)?")
            .expect("valid regex")
    });
    static VOLUME_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\b\d+(?:[.,]\d+)?\s?ml\b").expect("valid regex"));
    static MEDICATION_CUE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?:take|taking|administer|inject|injection|dose|dosage|syrup|suspension|solution|drops|spoonfuls?|teaspoons?|every\s+\d+\s+hours)\b")
            .expect("valid regex")
    });
    static DOSE_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?:\d+|one|two|three|four)\s+(?:tablets?|capsules?|pills?|puffs?|drops?|sachets?)\b")
            .expect("valid regex")
    });

    let unit_dose = DOSE_RE.captures_iter(text).any(|caps| match caps.get(1) {
        Some(per) => {
            let per = per.as_str().trim_start_matches(|c: char| c.is_whitespace() || c == '/');
            !matches!(per.to_lowercase().as_str(), "dl" | "l")
        }
        None => true,
    });
    let medicated_volume = text
        .split(['.', '!', '?', '\n'])
        .any(|sentence| VOLUME_RE.is_match(sentence) && MEDICATION_CUE_RE.is_match(sentence));

    unit_dose || medicated_volume || DOSE_FORM_RE.is_match(text)
}
