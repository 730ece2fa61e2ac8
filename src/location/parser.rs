//! Splits a raw location string into ordered name components.

/// Components shorter than this (in characters) are noise.
pub const MIN_COMPONENT_CHARS: usize = 2;

/// Mis-encoded punctuation found in exported data, with its literal form.
const ENCODED_PUNCTUATION: &[(&str, &str)] = &[("[APOS]", "'"), ("[QUOT]", "\"")];

/// Replace encoded punctuation artifacts and turn `;` separators into commas.
pub fn normalize(raw: &str) -> String {
    let mut s = raw.to_string();
    for (encoded, literal) in ENCODED_PUNCTUATION {
        s = s.replace(encoded, literal);
    }
    s.replace(';', ",")
}

/// Parse "Springfield, IL; USA" → ["Springfield", "IL", "USA"].
///
/// Order is preserved left to right. Pieces are trimmed but not filtered;
/// the resolver skips noise as it walks them.
pub fn parse_components(raw: &str) -> Vec<String> {
    let normalized = normalize(raw);
    if normalized.trim().is_empty() {
        return Vec::new();
    }
    normalized.split(',').map(|s| s.trim().to_string()).collect()
}

/// Stray characters like "-" or "?" that are not worth looking up.
pub fn is_noise(component: &str) -> bool {
    component.chars().count() < MIN_COMPONENT_CHARS
}
