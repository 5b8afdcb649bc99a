use std::sync::OnceLock;

use regex::RegexSet;

/// Permission-seeking phrasings that trigger an automatic "yes, proceed"
/// continuation turn instead of returning control to the user.
const PATTERNS: &[&str] = &[
    r"(?i)want me to .*\?",
    r"(?i)should i .*\?",
    r"(?i)shall i .*\?",
    r"(?i)would you like me to .*\?",
    r"(?i)ready to proceed\?",
    r"(?i)proceed\?",
    r"(?i)go ahead\?",
    r"(?i)continue\?",
    r"(?i)do you want me to .*\?",
    r"(?i)i can .* if you('d)? like",
    r"(?i)let me know if",
];

fn pattern_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(PATTERNS).expect("auto-continue patterns are valid regex"))
}

/// Whether the tail of a response reads as a permission-seeking question
/// that should trigger an auto-continue round, checked against the last
/// 200 characters as the original does.
pub fn should_auto_continue(response: &str) -> bool {
    if response.is_empty() {
        return false;
    }
    let tail_start = response
        .char_indices()
        .rev()
        .nth(199)
        .map(|(i, _)| i)
        .unwrap_or(0);
    pattern_set().is_match(&response[tail_start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_permission_seeking_question() {
        assert!(should_auto_continue(
            "I found 3 matching files. Want me to delete them?"
        ));
    }

    #[test]
    fn plain_answer_does_not_trigger() {
        assert!(!should_auto_continue("The answer is 42."));
    }

    #[test]
    fn empty_response_does_not_trigger() {
        assert!(!should_auto_continue(""));
    }

    #[test]
    fn checks_only_the_tail() {
        let filler = "x".repeat(500);
        let response = format!("Let me know if you want more. {filler} The answer is 42.");
        assert!(!should_auto_continue(&response));
    }
}
