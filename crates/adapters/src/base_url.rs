use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/v\d+/?$").unwrap());

/// Normalizes an OpenAI-compatible base URL: trims, appends `/v1` when no
/// version segment is present, and treats a trailing `#` as "use exactly
/// this URL".
pub fn normalize_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Some(exact) = trimmed.strip_suffix('#') {
        return exact.to_string();
    }

    if VERSION_SUFFIX_RE.is_match(trimmed) || trimmed.contains("/v1") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", trimmed.trim_end_matches('/'))
    }
}
