use std::sync::LazyLock;

use regex::Regex;

static ISO_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})-(\d{2})-(\d{2})[T ](\d{2}):(\d{2})(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("valid datetime pattern")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid date pattern"));

static TIME_WITH_SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2}):(\d{2}):\d{2}\b").expect("valid time pattern"));

/// Formats a backend error body for display.
///
/// JSON bodies are unwrapped to their `message` (or `error`) field. ISO
/// timestamps become `DD.MM.YYYY HH:MM`, bare dates `DD.MM.YYYY`, seconds are
/// dropped from times and trailing punctuation is trimmed.
pub fn format_server_message(body: &str) -> String {
    let text = extract_message(body);
    let text = ISO_DATETIME.replace_all(&text, "$3.$2.$1 $4:$5");
    let text = ISO_DATE.replace_all(&text, "$3.$2.$1");
    let text = TIME_WITH_SECONDS.replace_all(&text, "$1:$2");
    text.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '!'))
        .trim_start()
        .to_string()
}

fn extract_message(body: &str) -> String {
    let trimmed = body.trim();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return trimmed.trim_matches('"').to_string();
    };
    for field in ["message", "error", "detail"] {
        match value.get(field) {
            Some(serde_json::Value::String(s)) => return s.clone(),
            Some(serde_json::Value::Array(items)) => {
                let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
                if !parts.is_empty() {
                    return parts.join("; ");
                }
            }
            _ => {}
        }
    }
    match value {
        serde_json::Value::String(s) => s,
        _ => trimmed.to_string(),
    }
}
