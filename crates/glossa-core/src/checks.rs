use std::collections::BTreeMap;

use glossa_types::ValidationResult;
use once_cell::sync::Lazy;
use regex::Regex;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{[A-Za-z0-9_]*\}|%(?:\d+\$)?[sdif@]").expect("valid placeholder regex")
});

/// Placeholders in `text`, counted by their literal form.
pub fn placeholders(text: &str) -> BTreeMap<&str, usize> {
    let mut found = BTreeMap::new();
    for m in PLACEHOLDER.find_iter(text) {
        *found.entry(m.as_str()).or_insert(0) += 1;
    }
    found
}

fn edge_whitespace(text: &str) -> (&str, &str) {
    let leading = &text[..text.len() - text.trim_start().len()];
    let trailing = &text[text.trim_end().len()..];
    (leading, trailing)
}

/// Translation checks run behind `/validate`. The first problem found is
/// reported.
pub fn check_translation(source: &str, content: &str) -> ValidationResult {
    if content.trim().is_empty() {
        return ValidationResult::failed("translation is empty");
    }

    let expected = placeholders(source);
    let actual = placeholders(content);
    if let Some((token, _)) = expected
        .iter()
        .find(|&(token, &count)| actual.get(token).copied().unwrap_or(0) < count)
    {
        return ValidationResult::failed(format!("placeholder {token} is missing"));
    }
    if let Some((token, _)) = actual
        .iter()
        .find(|&(token, &count)| expected.get(token).copied().unwrap_or(0) < count)
    {
        return ValidationResult::failed(format!("placeholder {token} is not in the source"));
    }

    if source.trim().is_empty() {
        return ValidationResult::passed();
    }
    let (src_lead, src_trail) = edge_whitespace(source);
    let (dst_lead, dst_trail) = edge_whitespace(content);
    if src_lead != dst_lead {
        return ValidationResult::failed("leading whitespace differs from the source");
    }
    if src_trail != dst_trail {
        return ValidationResult::failed("trailing whitespace differs from the source");
    }
    ValidationResult::passed()
}
