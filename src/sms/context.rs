//! Context assembly for the LLM agents: match summaries, conversation
//! history blocks, and interpretation rendering.

use serde_json::{json, Value};

use crate::clearing::engine::Tier1Match;
use crate::sms::contracts::MessageInterpretation;

pub const MAX_RECENT_MESSAGES: usize = 8;

/// Buyer-safe summary of one presented match. Stored in the conversation
/// snapshot and used for positional reference resolution.
pub fn build_match_summaries(tier1: &[Tier1Match], buyer_sqft: Option<i64>) -> Vec<Value> {
    tier1
        .iter()
        .map(|m| {
            let monthly = buyer_sqft.map(|sqft| (sqft as f64 * m.buyer_rate).round());
            json!({
                "id": m.match_id,
                "warehouse_id": m.warehouse_id,
                "city": m.city,
                "state": m.state,
                "rate": m.buyer_rate,
                "monthly": monthly,
                "sqft": m.available_sqft,
                "description": m.description,
                "reasoning": m.reasoning,
            })
        })
        .collect()
}

/// Render recent history as a labelled text block for prompt injection.
pub fn format_recent_messages(history: &[(String, String)]) -> String {
    if history.is_empty() {
        return String::new();
    }
    let start = history.len().saturating_sub(MAX_RECENT_MESSAGES);
    let lines: Vec<String> = history[start..]
        .iter()
        .map(|(role, content)| {
            let label = match role.as_str() {
                "buyer" | "user" | "inbound" => "Buyer",
                "agent" | "assistant" | "outbound" => "You",
                other => return format!("{}: {}", capitalize(other), truncate(content, 300)),
            };
            format!("{label}: {}", truncate(content, 300))
        })
        .collect();
    format!("RECENT CONVERSATION:\n{}", lines.join("\n"))
}

/// Render the interpreter output as a readable prompt section.
pub fn format_interpretation(interp: &MessageInterpretation) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !interp.cities.is_empty() {
        parts.push(format!("- City: {}", interp.cities.join(", ")));
    }
    if !interp.states.is_empty() {
        parts.push(format!("- State: {}", interp.states.join(", ")));
    }
    if let Some(sqft) = interp.sqft {
        parts.push(format!("- Size: {sqft} sqft"));
    }
    if !interp.features.is_empty() {
        parts.push(format!("- Features: {}", interp.features.join(", ")));
    }
    if !interp.topics.is_empty() {
        parts.push(format!("- Topics: {}", interp.topics.join(", ")));
    }
    if !interp.positional_references.is_empty() {
        let refs: Vec<String> = interp.positional_references.iter().map(|n| n.to_string()).collect();
        parts.push(format!("- Positional references: {}", refs.join(", ")));
    }
    if !interp.action_keywords.is_empty() {
        parts.push(format!("- Action keywords: {}", interp.action_keywords.join(", ")));
    }
    if !interp.emails.is_empty() {
        parts.push(format!("- Emails: {}", interp.emails.join(", ")));
    }
    if !interp.names.is_empty() {
        parts.push(format!("- Names: {}", interp.names.join(", ")));
    }
    if parts.is_empty() {
        return String::new();
    }
    format!("PRE-PARSED MESSAGE DATA:\n{}", parts.join("\n"))
}

/// Render presented matches for reference resolution in the planner prompt.
pub fn format_match_options(summaries: &[Value]) -> String {
    if summaries.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = summaries
        .iter()
        .enumerate()
        .map(|(i, m)| {
            format!(
                "  Option {} (id={}): {}, {} sqft, ${}/sqft",
                i + 1,
                m["id"].as_str().unwrap_or("?"),
                m["city"].as_str().unwrap_or("?"),
                m["sqft"].as_i64().map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
                m["rate"].as_f64().map(|v| format!("{v:.2}")).unwrap_or_else(|| "?".into()),
            )
        })
        .collect();
    format!("Presented matches:\n{}", lines.join("\n"))
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sms::interpreter::interpret_message;

    #[test]
    fn test_history_formatting_limits_and_labels() {
        let history: Vec<(String, String)> = (0..12)
            .map(|i| {
                let role = if i % 2 == 0 { "buyer" } else { "agent" };
                (role.to_string(), format!("message {i}"))
            })
            .collect();
        let block = format_recent_messages(&history);
        assert!(block.starts_with("RECENT CONVERSATION:"));
        // Only the last 8 make it in
        assert!(!block.contains("message 3"));
        assert!(block.contains("message 4"));
        assert!(block.contains("Buyer: message 4"));
        assert!(block.contains("You: message 5"));
    }

    #[test]
    fn test_interpretation_block() {
        let interp = interpret_message("10k sqft in Dallas TX with dock doors");
        let block = format_interpretation(&interp);
        assert!(block.contains("City: Dallas"));
        assert!(block.contains("State: TX"));
        assert!(block.contains("Size: 10000 sqft"));
    }

    #[test]
    fn test_empty_history_and_interp() {
        assert_eq!(format_recent_messages(&[]), "");
        let interp = interpret_message("ok");
        assert_eq!(format_interpretation(&interp), "");
    }

    #[test]
    fn test_match_option_rendering() {
        let summaries = vec![serde_json::json!({
            "id": "m-1", "city": "Dallas", "sqft": 12000, "rate": 6.36
        })];
        let block = format_match_options(&summaries);
        assert!(block.contains("Option 1 (id=m-1): Dallas, 12000 sqft, $6.36/sqft"));
    }
}
