//! Message interpreter — deterministic only, no LLM calls.
//!
//! Keyword and pattern extraction over inbound buyer SMS: known cities,
//! state abbreviations, square footage, property topics, feature mentions,
//! positional references, action keywords, names, and emails.

use crate::sms::contracts::MessageInterpretation;

/// Top metros plus the warehouse submarkets buyers actually name.
const KNOWN_CITIES: &[&str] = &[
    "los angeles", "new york", "chicago", "houston", "phoenix", "philadelphia",
    "san antonio", "san diego", "dallas", "san jose", "austin", "jacksonville",
    "fort worth", "columbus", "charlotte", "san francisco", "indianapolis",
    "seattle", "denver", "washington", "nashville", "oklahoma city", "el paso",
    "boston", "portland", "las vegas", "memphis", "louisville", "baltimore",
    "milwaukee", "albuquerque", "tucson", "fresno", "mesa", "sacramento",
    "atlanta", "kansas city", "colorado springs", "omaha", "raleigh", "miami",
    "long beach", "virginia beach", "oakland", "minneapolis", "tulsa", "tampa",
    "arlington", "new orleans", "detroit", "commerce", "compton", "vernon",
    "city of industry", "fontana", "riverside", "ontario", "corona",
    "rancho cucamonga", "inland empire", "south gate", "carson", "torrance",
    "jersey city", "newark", "elizabeth", "edison", "paterson", "clifton",
    "trenton", "bayonne",
];

const STATE_ABBRS: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID",
    "IL", "IN", "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS",
    "MO", "MT", "NE", "NV", "NH", "NJ", "NM", "NY", "NC", "ND", "OH", "OK",
    "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA", "WV",
    "WI", "WY", "DC",
];

/// Topic keyword catalog mapped to property-attribute field keys.
pub const TOPIC_CATALOG: &[(&str, &[&str], &[&str])] = &[
    ("clear_height", &["ceiling", "height", "clearance", "clear height"], &["clear_height_ft"]),
    ("dock_doors", &["dock", "loading dock", "dock door"], &["dock_doors_receiving", "dock_doors_shipping"]),
    ("power", &["power", "electric", "amps", "voltage", "3 phase", "three phase"], &["power_supply"]),
    ("office", &["office", "office space"], &["has_office"]),
    ("sprinkler", &["sprinkler", "fire suppression", "fire protection"], &["has_sprinkler"]),
    ("parking", &["parking", "trailer parking", "truck parking"], &["parking_spaces"]),
    ("size", &["how big", "square feet", "square footage", "how large"], &["building_size_sqft"]),
    ("year_built", &["year built", "how old", "when built", "age of"], &["year_built"]),
    ("construction", &["construction", "tilt-up", "steel", "concrete"], &["construction_type"]),
    ("zoning", &["zoning", "zoned for"], &["zoning"]),
    ("rate", &["rate", "price", "cost", "how much", "per sqft", "per square foot"], &["supplier_rate_per_sqft"]),
    ("availability", &["available", "when available", "move in", "start date"], &["available_from", "available_sqft"]),
];

const FEATURE_KEYWORDS: &[(&str, &[&str])] = &[
    ("office", &["office"]),
    ("dock_doors", &["dock door", "dock doors", "dock high", "dock"]),
    ("climate", &["climate", "temperature", "refrigerat", "cold", "cool", "heat"]),
    ("power", &["power", "electric", "amp", "volt", "3 phase"]),
    ("24_7", &["24/7", "24 7", "24-7"]),
    ("sprinkler", &["sprinkler"]),
    ("parking", &["parking"]),
    ("forklift", &["forklift"]),
];

const BOOK_VERBS: &[&str] = &["book", "reserve", "lock", "secure", "take"];
const BOOK_OBJECTS: &[&str] = &["it", "that", "this", "space", "one"];
const TOUR_WORDS: &[&str] = &["tour", "visit", "see", "view", "walk through", "walkthrough", "check out"];
const COMMITMENT_PHRASES: &[&str] = &[
    "i want", "i'll take", "ill take", "sign me up", "let's do it", "lets do it", "ready to go",
];

const NAME_PREFIXES: &[&str] = &["i'm ", "im ", "i am ", "my name is ", "this is ", "name: ", "name:"];

/// True when `word` appears in `text` bounded by non-alphanumerics.
pub fn contains_word(text: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !text[..abs].chars().next_back().map(|c| c.is_alphanumeric()).unwrap_or(false);
        let after = abs + word.len();
        let after_ok = after >= text.len()
            || !text[after..].chars().next().map(|c| c.is_alphanumeric()).unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
        if start >= text.len() {
            break;
        }
    }
    false
}

/// Extract structured data from a buyer SMS.
pub fn interpret_message(text: &str) -> MessageInterpretation {
    let mut result = MessageInterpretation {
        raw_text: text.to_string(),
        ..Default::default()
    };
    let lower = text.to_lowercase();

    for city in KNOWN_CITIES {
        if lower.contains(city) {
            result.cities.push(title_case(city));
        }
    }

    for token in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.len() == 2
            && token.chars().all(|c| c.is_ascii_uppercase())
            && STATE_ABBRS.contains(&token)
            && !result.states.iter().any(|s| s == token)
        {
            result.states.push(token.to_string());
        }
    }

    result.sqft = extract_sqft(&lower);

    result.topics = detect_topics(&lower);

    for (feature, keywords) in FEATURE_KEYWORDS {
        if keywords.iter().any(|kw| lower.contains(kw))
            && !result.features.iter().any(|f| f == feature)
        {
            result.features.push(feature.to_string());
        }
    }

    result.positional_references = extract_positional_refs(&lower);
    result.action_keywords = extract_action_keywords(&lower);
    result.emails = extract_emails(text);
    if let Some(name) = extract_name(text) {
        result.names.push(name);
    }

    result
}

/// Detect property topics mentioned in text. Returns topic keys.
pub fn detect_topics(lower: &str) -> Vec<String> {
    TOPIC_CATALOG
        .iter()
        .filter(|(_, keywords, _)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(topic, _, _)| topic.to_string())
        .collect()
}

/// Field keys behind a set of topics.
pub fn field_keys_for_topics(topics: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for topic in topics {
        if let Some((_, _, field_keys)) = TOPIC_CATALOG.iter().find(|(t, _, _)| t == topic) {
            for key in *field_keys {
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
            }
        }
    }
    keys
}

/// Parse "10k sqft", "10,000 sf", "10000 square feet", or a bare "10k".
fn extract_sqft(lower: &str) -> Option<i64> {
    let chars: Vec<char> = lower.chars().collect();
    let mut i = 0;
    let mut bare_k: Option<i64> = None;

    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            let start = i;
            let mut digits = String::new();
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == ',') {
                if chars[i] != ',' {
                    digits.push(chars[i]);
                }
                i += 1;
            }
            let Ok(mut value) = digits.parse::<i64>() else { continue };

            // Skip whitespace, then an optional thousands suffix
            let mut j = i;
            while j < chars.len() && chars[j] == ' ' {
                j += 1;
            }
            let mut has_k = false;
            let mut k_boundary_ok = false;
            if j < chars.len() && chars[j] == 'k' {
                has_k = true;
                j += 1;
                k_boundary_ok = j >= chars.len() || !chars[j].is_alphanumeric();
            }
            while j < chars.len() && chars[j] == ' ' {
                j += 1;
            }

            let rest: String = chars[j..].iter().collect();
            let has_unit = rest.starts_with("sqft")
                || rest.starts_with("sq ft")
                || rest.starts_with("sq feet")
                || rest.starts_with("sqfeet")
                || rest.starts_with("sf")
                || rest.starts_with("square feet")
                || rest.starts_with("square foot");

            if has_k {
                value *= 1000;
            }
            if has_unit {
                return Some(value);
            }
            if has_k && k_boundary_ok && bare_k.is_none() {
                // Remember a bare "10k" in case no unit-qualified number shows up
                bare_k = Some(value);
            }
            let _ = start;
        } else {
            i += 1;
        }
    }
    bare_k
}

fn extract_positional_refs(lower: &str) -> Vec<usize> {
    let mut refs = Vec::new();

    for marker in ["option", "number", "#"] {
        let mut search = 0;
        while let Some(pos) = lower[search..].find(marker) {
            let after = search + pos + marker.len();
            let digits: String = lower[after..]
                .chars()
                .skip_while(|c| *c == ' ')
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(n) = digits.parse::<usize>() {
                if n >= 1 && !refs.contains(&n) {
                    refs.push(n);
                }
            }
            search = after;
        }
    }

    for (ordinal, n) in [("first", 1usize), ("second", 2), ("third", 3)] {
        if contains_word(lower, ordinal) {
            let tail = &lower[lower.find(ordinal).unwrap() + ordinal.len()..];
            let follows_noun = ["one", "option", "property", "space", "warehouse"]
                .iter()
                .any(|noun| tail.trim_start().starts_with(noun));
            if follows_noun && !refs.contains(&n) {
                refs.push(n);
            }
        }
    }

    refs
}

fn extract_action_keywords(lower: &str) -> Vec<String> {
    let mut actions = Vec::new();

    for verb in BOOK_VERBS {
        if let Some(pos) = lower.find(verb) {
            if contains_word(lower, verb) {
                let tail = &lower[pos + verb.len()..];
                if BOOK_OBJECTS.iter().any(|obj| contains_word(tail, obj)) {
                    actions.push("book".to_string());
                    break;
                }
            }
        }
    }

    let tour_hit = TOUR_WORDS.iter().any(|w| {
        if w.contains(' ') {
            lower.contains(w)
        } else {
            contains_word(lower, w)
        }
    });
    if tour_hit {
        actions.push("tour".to_string());
    }

    if COMMITMENT_PHRASES.iter().any(|p| lower.contains(p)) {
        actions.push("commitment".to_string());
    }

    actions
}

fn extract_emails(text: &str) -> Vec<String> {
    let mut emails = Vec::new();
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if b != b'@' {
            continue;
        }
        let is_local = |c: u8| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'_' | b'%' | b'+' | b'-');
        let is_domain = |c: u8| c.is_ascii_alphanumeric() || matches!(c, b'.' | b'-');

        let mut start = i;
        while start > 0 && is_local(bytes[start - 1]) {
            start -= 1;
        }
        let mut end = i + 1;
        while end < bytes.len() && is_domain(bytes[end]) {
            end += 1;
        }
        if start == i || end == i + 1 {
            continue;
        }

        let candidate = &text[start..end];
        let domain = &candidate[candidate.find('@').unwrap() + 1..];
        let tld_ok = domain
            .rsplit('.')
            .next()
            .map(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
            .unwrap_or(false);
        if domain.contains('.') && tld_ok && !emails.contains(&candidate.to_string()) {
            emails.push(candidate.to_string());
        }
    }
    emails
}

/// "I'm John Smith", "my name is Jane" — capture one or two capitalized words.
fn extract_name(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    for prefix in NAME_PREFIXES {
        let mut search = 0;
        while let Some(pos) = lower[search..].find(prefix) {
            let after = search + pos + prefix.len();
            let tail = text[after..].trim_start();
            let words: Vec<&str> = tail.split_whitespace().take(2).collect();

            let capitalized: Vec<&str> = words
                .into_iter()
                .take_while(|w| {
                    let mut chars = w.trim_end_matches(['.', ',', '!', '?']).chars();
                    match chars.next() {
                        Some(first) => first.is_ascii_uppercase() && chars.all(|c| c.is_ascii_lowercase()),
                        None => false,
                    }
                })
                .collect();

            if !capitalized.is_empty() {
                let cleaned: Vec<String> = capitalized
                    .iter()
                    .map(|w| w.trim_end_matches(['.', ',', '!', '?']).to_string())
                    .collect();
                return Some(cleaned.join(" "));
            }
            search = after;
        }
    }
    None
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_and_state_extraction() {
        let result = interpret_message("Looking for space in Dallas TX");
        assert_eq!(result.cities, vec!["Dallas"]);
        assert_eq!(result.states, vec!["TX"]);
    }

    #[test]
    fn test_sqft_variants() {
        assert_eq!(interpret_message("need 10k sqft").sqft, Some(10_000));
        assert_eq!(interpret_message("about 10,000 sf").sqft, Some(10_000));
        assert_eq!(interpret_message("10000 square feet please").sqft, Some(10_000));
        assert_eq!(interpret_message("around 5k would work").sqft, Some(5_000));
        assert_eq!(interpret_message("no numbers here").sqft, None);
    }

    #[test]
    fn test_positional_references() {
        assert_eq!(interpret_message("can I see option 2?").positional_references, vec![2]);
        assert_eq!(interpret_message("tell me about #1").positional_references, vec![1]);
        assert_eq!(interpret_message("the first one looks good").positional_references, vec![1]);
        assert_eq!(interpret_message("the second option").positional_references, vec![2]);
    }

    #[test]
    fn test_action_keywords() {
        assert!(interpret_message("I'd like to book it")
            .action_keywords
            .contains(&"book".to_string()));
        assert!(interpret_message("can I tour the space")
            .action_keywords
            .contains(&"tour".to_string()));
        assert!(interpret_message("sign me up")
            .action_keywords
            .contains(&"commitment".to_string()));
        assert!(interpret_message("what is the rate").action_keywords.is_empty());
    }

    #[test]
    fn test_email_extraction() {
        let result = interpret_message("reach me at jane.doe+wex@example.com thanks");
        assert_eq!(result.emails, vec!["jane.doe+wex@example.com"]);
        assert!(interpret_message("no at-sign here").emails.is_empty());
        assert!(interpret_message("weird @ floating").emails.is_empty());
    }

    #[test]
    fn test_name_extraction() {
        assert_eq!(
            interpret_message("Hi, I'm John Smith").names,
            vec!["John Smith".to_string()]
        );
        assert_eq!(
            interpret_message("my name is Sarah").names,
            vec!["Sarah".to_string()]
        );
        assert!(interpret_message("i'm looking for space").names.is_empty());
    }

    #[test]
    fn test_topics_and_features() {
        let result = interpret_message("does it have dock doors and a sprinkler system?");
        assert!(result.topics.contains(&"dock_doors".to_string()));
        assert!(result.topics.contains(&"sprinkler".to_string()));
        assert!(result.features.contains(&"dock_doors".to_string()));
        assert!(result.features.contains(&"sprinkler".to_string()));
    }

    #[test]
    fn test_field_keys_for_topics() {
        let keys = field_keys_for_topics(&["dock_doors".to_string(), "rate".to_string()]);
        assert!(keys.contains(&"dock_doors_receiving".to_string()));
        assert!(keys.contains(&"supplier_rate_per_sqft".to_string()));
    }

    #[test]
    fn test_has_search_data() {
        assert!(interpret_message("warehouse in Dallas").has_search_data());
        assert!(interpret_message("10k sqft").has_search_data());
        assert!(!interpret_message("thanks!").has_search_data());
    }

    #[test]
    fn test_contains_word_boundaries() {
        assert!(contains_word("book it now", "book"));
        assert!(!contains_word("facebook it", "book"));
        assert!(contains_word("see, that one", "see"));
    }
}
