//! Deterministic SMS validation.
//!
//! The outbound gatekeeper is the last line before a reply leaves the
//! system; it never passes an over-length, garbled, PII-leaking, or
//! context-inappropriate message. Inbound validation is a lighter screen.

use crate::sms::contracts::GatekeeperResult;
use crate::sms::interpreter::contains_word;

pub const MAX_FIRST_MESSAGE: usize = 800;
pub const MAX_FOLLOWUP: usize = 480;
pub const MIN_LENGTH: usize = 20;
pub const MAX_INBOUND: usize = 1600;

const WORD_REPETITION_THRESHOLD: usize = 5;
const REPEATED_CHAR_RUN: usize = 40;

const PROFANITY_WORDS: &[&str] = &[
    "fuck", "fucking", "fucker", "shit", "shitty", "asshole", "bitch", "dick",
    "cock", "pussy", "ass", "damn", "crap",
];

/// Common words excluded from the repetition check.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had",
    "her", "was", "one", "our", "out", "has", "his", "how", "its", "may",
    "new", "now", "old", "see", "two", "way", "who", "did", "get", "let",
    "put", "say", "she", "too", "use", "with", "this", "that", "from",
    "they", "been", "have", "many", "some", "them", "then", "will", "more",
    "when", "your", "into", "just",
];

fn has_url(text: &str) -> bool {
    text.contains("http://") || text.contains("https://")
}

fn check_length(text: &str, is_first_message: bool, url: bool) -> GatekeeperResult {
    if text.trim().is_empty() {
        return GatekeeperResult::fail("Empty reply", "empty");
    }

    // Messages with URLs get extra room, links are non-compressible
    let max_len = if is_first_message || url {
        MAX_FIRST_MESSAGE
    } else {
        MAX_FOLLOWUP
    };

    if text.len() > max_len {
        return GatekeeperResult::fail(
            format!("Reply too long ({} chars, max {max_len}). Compress it.", text.len()),
            "too_long",
        );
    }
    if text.len() < MIN_LENGTH {
        return GatekeeperResult::fail(
            format!("Reply too short ({} chars)", text.len()),
            "too_short",
        );
    }
    GatekeeperResult::pass()
}

fn check_garbage(text: &str) -> GatekeeperResult {
    // Long single-character runs
    let mut run = 0usize;
    let mut last: Option<char> = None;
    for c in text.chars() {
        if Some(c) == last {
            run += 1;
            if run >= REPEATED_CHAR_RUN {
                return GatekeeperResult::fail("Contains repeated characters", "garbage_repeated");
            }
        } else {
            run = 1;
            last = Some(c);
        }
    }

    // Letter ratio, spaces excluded from the denominator
    let non_space = text.chars().filter(|c| *c != ' ').count();
    let alpha = text.chars().filter(|c| c.is_alphabetic()).count();
    if non_space > 20 && (alpha as f64) / (non_space as f64) < 0.40 {
        return GatekeeperResult::fail("Low letter ratio, may be garbage", "garbage_ratio");
    }

    // Repetition of non-stop words with 3+ characters
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for word in text.to_lowercase().split_whitespace() {
        let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if word.len() >= 3 {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    for (word, count) in counts {
        if count > WORD_REPETITION_THRESHOLD && !STOP_WORDS.contains(&word.as_str()) {
            return GatekeeperResult::fail(
                format!("Word '{word}' repeated {count} times"),
                "garbage_repetition",
            );
        }
    }

    GatekeeperResult::pass()
}

/// Count US phone numbers: 10-11 digit runs allowing single separators.
pub fn count_phone_numbers(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0usize;
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let mut digits = 0usize;
        let mut j = i;
        let mut separator_pending = false;
        while j < chars.len() {
            let c = chars[j];
            if c.is_ascii_digit() {
                digits += 1;
                separator_pending = false;
                j += 1;
            } else if !separator_pending && matches!(c, '-' | '.' | ' ' | '(' | ')' | '+') {
                separator_pending = true;
                j += 1;
            } else {
                break;
            }
        }
        if (10..=11).contains(&digits) {
            count += 1;
        }
        i = j.max(i + 1);
    }
    count
}

fn count_emails(text: &str) -> usize {
    crate::sms::interpreter::interpret_message(text).emails.len()
}

fn check_pii(text: &str) -> GatekeeperResult {
    if count_phone_numbers(text) > 1 {
        return GatekeeperResult::fail("Contains multiple phone numbers", "multiple_phones");
    }
    if count_emails(text) > 1 {
        return GatekeeperResult::fail("Contains multiple email addresses", "multiple_emails");
    }
    GatekeeperResult::pass()
}

fn check_profanity(text: &str) -> GatekeeperResult {
    let lower = text.to_lowercase();
    if PROFANITY_WORDS.iter().any(|w| contains_word(&lower, w)) {
        return GatekeeperResult::fail("Contains inappropriate language", "profanity");
    }
    GatekeeperResult::pass()
}

fn check_context(text: &str, context: Option<&str>) -> GatekeeperResult {
    let Some(context) = context else {
        return GatekeeperResult::pass();
    };
    let lower = text.to_lowercase();

    match context {
        "commitment" => {
            if !lower.contains("http") && !lower.contains("link") && !lower.contains("warehouseexchange") {
                return GatekeeperResult::fail(
                    "Commitment message must contain a guarantee link",
                    "missing_link",
                );
            }
        }
        "tour" => {
            let scheduling = ["tour", "visit", "schedule", "appointment", "time", "date", "when"];
            if !scheduling.iter().any(|w| contains_word(&lower, w)) {
                return GatekeeperResult::fail(
                    "Tour message must contain scheduling language",
                    "missing_schedule",
                );
            }
        }
        "awaiting_answer" => {
            let waiting = [
                "waiting", "checking", "look into", "get back to you", "let you know",
                "find out", "working on",
            ];
            if !waiting.iter().any(|p| lower.contains(p)) {
                return GatekeeperResult::fail(
                    "Awaiting-answer reply must acknowledge the pending inquiry",
                    "missing_wait_language",
                );
            }
        }
        _ => {}
    }
    GatekeeperResult::pass()
}

/// Validate outbound SMS before sending.
pub fn validate_outbound(text: &str, is_first_message: bool, context: Option<&str>) -> GatekeeperResult {
    let url = has_url(text);
    for check in [
        check_length(text, is_first_message, url),
        check_garbage(text),
        check_pii(text),
        check_profanity(text),
        check_context(text, context),
    ] {
        if !check.ok {
            return check;
        }
    }
    GatekeeperResult::pass()
}

/// Validate inbound buyer SMS.
pub fn validate_inbound(text: &str) -> GatekeeperResult {
    if text.trim().is_empty() {
        return GatekeeperResult::fail("Empty message", "empty");
    }
    if text.len() > MAX_INBOUND {
        return GatekeeperResult::fail(
            format!("Message too long ({} chars)", text.len()),
            "too_long",
        );
    }
    check_profanity(text)
}

/// Trim text to the SMS limit, preferring a sentence boundary that keeps at
/// least half the allowed length, then a word boundary, then a hard cut.
pub fn trim_to_limit(text: &str, is_first_message: bool) -> String {
    let max_length = if is_first_message { MAX_FIRST_MESSAGE } else { MAX_FOLLOWUP };
    if text.len() <= max_length {
        return text.to_string();
    }

    let boundary = floor_char_boundary(text, max_length);
    let candidate = &text[..boundary];
    let half = max_length / 2;

    for sep in [". ", "? ", "! "] {
        if let Some(idx) = candidate.rfind(sep) {
            if idx >= half {
                return text[..idx + 1].to_string();
            }
        }
    }

    let limit = floor_char_boundary(text, max_length.saturating_sub(3));
    let snippet = &text[..limit];
    match snippet.rfind(' ') {
        Some(idx) if idx > 0 => format!("{}...", &snippet[..idx]),
        _ => format!("{snippet}..."),
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_limits() {
        let short = "hi";
        assert_eq!(validate_outbound(short, false, None).violation, Some("too_short"));

        let long = "a big reply ".repeat(60); // > 480
        assert_eq!(validate_outbound(&long, false, None).violation, Some("too_long"));

        // First messages get 800
        let medium = distinct_words(80); // ~640 chars, no repeated words
        assert!(medium.len() > MAX_FOLLOWUP && medium.len() < MAX_FIRST_MESSAGE);
        assert!(validate_outbound(&medium, true, None).ok);
        assert!(!validate_outbound(&medium, false, None).ok);
    }

    fn distinct_words(n: usize) -> String {
        (0..n)
            .map(|i| format!("item{i:03}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_url_relaxes_length() {
        let text = format!(
            "Here are your options: https://example.com/options {}",
            distinct_words(80)
        );
        assert!(text.len() > MAX_FOLLOWUP && text.len() < MAX_FIRST_MESSAGE);
        assert!(validate_outbound(&text, false, None).ok);
    }

    #[test]
    fn test_garbage_repeated_chars() {
        let text = format!("great option {}", "!".repeat(50));
        assert_eq!(validate_outbound(&text, false, None).violation, Some("garbage_repeated"));
    }

    #[test]
    fn test_garbage_low_letter_ratio() {
        let text = "1234567890 0987654321 1111 2222 3333 44";
        assert_eq!(check_garbage(text).violation, Some("garbage_ratio"));
    }

    #[test]
    fn test_garbage_word_repetition() {
        let text = "space space space space space space space is what you need";
        assert_eq!(validate_outbound(text, false, None).violation, Some("garbage_repetition"));
    }

    #[test]
    fn test_stop_words_exempt_from_repetition() {
        let text = "that that that that that that that said, this reply is fine overall";
        assert!(check_garbage(text).ok);
    }

    #[test]
    fn test_multiple_phone_numbers_rejected() {
        let text = "Call 202-555-0100 or maybe 303-555-0199 to talk it over today";
        assert_eq!(validate_outbound(text, false, None).violation, Some("multiple_phones"));

        let one = "Call 202-555-0100 whenever works for you this week";
        assert!(validate_outbound(one, false, None).ok);
    }

    #[test]
    fn test_multiple_emails_rejected() {
        let text = "Email a@example.com or b@example.com and we will go from there";
        assert_eq!(validate_outbound(text, false, None).violation, Some("multiple_emails"));
    }

    #[test]
    fn test_profanity_rejected() {
        assert_eq!(
            validate_outbound("this damn warehouse is available now", false, None).violation,
            Some("profanity")
        );
        // Substrings of clean words do not trip the check
        assert!(validate_outbound("the classic brick building is ready", false, None).ok);
    }

    #[test]
    fn test_commitment_context_requires_link() {
        let no_link = "Great, you are all set. We will be in touch shortly.";
        assert_eq!(
            validate_outbound(no_link, false, Some("commitment")).violation,
            Some("missing_link")
        );
        let with_link = "Here is your guarantee link: https://example.com/g/abc123";
        assert!(validate_outbound(with_link, false, Some("commitment")).ok);
    }

    #[test]
    fn test_tour_context_requires_scheduling_language() {
        let vague = "Sounds good, that property is a solid pick for you.";
        assert_eq!(
            validate_outbound(vague, false, Some("tour")).violation,
            Some("missing_schedule")
        );
        let scheduled = "What date and time works for your visit next week?";
        assert!(validate_outbound(scheduled, false, Some("tour")).ok);
    }

    #[test]
    fn test_awaiting_answer_context() {
        let bad = "That's a great question about the dock doors there.";
        assert_eq!(
            validate_outbound(bad, false, Some("awaiting_answer")).violation,
            Some("missing_wait_language")
        );
        let good = "Good question, I'm checking with the team and will get back to you.";
        assert!(validate_outbound(good, false, Some("awaiting_answer")).ok);
    }

    #[test]
    fn test_inbound_validation() {
        assert!(!validate_inbound("").ok);
        assert!(!validate_inbound(&"x".repeat(1601)).ok);
        assert!(validate_inbound("looking for 5k sqft in Austin").ok);
    }

    #[test]
    fn test_trim_prefers_sentence_boundary() {
        let mut text = String::new();
        while text.len() < 470 {
            text.push_str("This is a complete sentence about warehouses. ");
        }
        text.push_str(&"and then an extremely long run-on tail ".repeat(5));
        let trimmed = trim_to_limit(&text, false);
        assert!(trimmed.len() <= MAX_FOLLOWUP);
        assert!(trimmed.ends_with('.'));
    }

    #[test]
    fn test_trim_word_boundary_fallback() {
        let text = "word ".repeat(200);
        let trimmed = trim_to_limit(&text, false);
        assert!(trimmed.len() <= MAX_FOLLOWUP);
        assert!(trimmed.ends_with("..."));
    }

    #[test]
    fn test_trim_noop_under_limit() {
        assert_eq!(trim_to_limit("short and sweet", false), "short and sweet");
    }
}
