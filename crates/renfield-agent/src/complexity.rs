//! Complexity Detector (§4.8): a pure, LLM-free classifier deciding whether
//! a turn goes down the fast single-tool path or the multi-step Agent Loop.

use std::sync::OnceLock;

use regex::RegexSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

const CONDITIONAL_PATTERNS: &[&str] = &[
    r"(?i)\bwenn\b.*\bdann\b",
    r"(?i)\bif\b.*\bthen\b",
];

const SEQUENCE_PATTERNS: &[&str] = &[
    r"(?i)\bund dann\b",
    r"(?i)\band then\b",
];

const THRESHOLD_PATTERNS: &[&str] = &[
    r"(?i)\b\w+er als\b",
    r"(?i)\b\w+er than\b",
    r"(?i)\bmore than\b",
    r"(?i)\bless than\b",
];

const QUESTION_WORDS: &[&str] = &["wer", "was", "wann", "wo", "warum", "wie", "who", "what", "when", "where", "why", "how"];

fn patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(CONDITIONAL_PATTERNS.iter().chain(SEQUENCE_PATTERNS).chain(THRESHOLD_PATTERNS)).expect("static complexity patterns compile")
    })
}

/// Two action verbs joined by "und"/"and" (multi-action), a weak heuristic
/// matched on conjunction + a second verb-like token count rather than a
/// verb lexicon, which this detector deliberately has none of.
fn has_multi_action(message: &str) -> bool {
    let lower = message.to_lowercase();
    let conjunction = if lower.contains(" und ") { " und " } else if lower.contains(" and ") { " and " } else { return false };
    let parts: Vec<&str> = lower.splitn(2, conjunction).collect();
    parts.len() == 2 && parts[0].split_whitespace().count() >= 2 && parts[1].split_whitespace().count() >= 2
}

fn has_compound_question(message: &str) -> bool {
    let lower = message.to_lowercase();
    let conjunction = if lower.contains(" und ") { " und " } else if lower.contains(" and ") { " and " } else { return false };
    let parts: Vec<&str> = lower.splitn(2, conjunction).collect();
    if parts.len() != 2 {
        return false;
    }
    let starts_with_question_word = |s: &str| QUESTION_WORDS.iter().any(|w| s.trim().starts_with(w));
    starts_with_question_word(parts[0]) && starts_with_question_word(parts[1])
}

/// §4.8: messages under 10 characters are always simple; otherwise complex
/// if any conditional/sequence/threshold/multi-action/compound-question
/// pattern matches.
pub fn classify(message: &str) -> Complexity {
    if message.trim().chars().count() < 10 {
        return Complexity::Simple;
    }
    if patterns().is_match(message) || has_multi_action(message) || has_compound_question(message) {
        return Complexity::Complex;
    }
    Complexity::Simple
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_are_always_simple() {
        assert_eq!(classify("turn on"), Complexity::Simple);
    }

    #[test]
    fn conditional_is_complex() {
        assert_eq!(classify("wenn es regnet dann mach das fenster zu"), Complexity::Complex);
        assert_eq!(classify("if it rains then close the window"), Complexity::Complex);
    }

    #[test]
    fn sequence_is_complex() {
        assert_eq!(classify("turn off the lights and then lock the door"), Complexity::Complex);
    }

    #[test]
    fn threshold_comparison_is_complex() {
        assert_eq!(classify("turn on the heater if it's colder than ten degrees"), Complexity::Complex);
    }

    #[test]
    fn compound_question_is_complex() {
        assert_eq!(classify("what time is it and where is the car"), Complexity::Complex);
    }

    #[test]
    fn plain_question_is_simple() {
        assert_eq!(classify("what time is it right now"), Complexity::Simple);
    }
}
