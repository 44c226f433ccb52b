//! # Language Code Normalization
//!
//! Speech recognizers, clients and translation tables all spell languages differently
//! ("nb-NO", "en_US", "english", "NN"). Everything downstream of the recognizer works on
//! a canonical two-letter code produced here.
//!
//! ## Rules (applied in order):
//! 1. Absent or blank → `"en"`
//! 2. Known language names map to their code (`"norwegian"` → `"no"`)
//! 3. Any Norwegian variant (bokmål, nynorsk, generic), with or without region → `"no"`
//! 4. `en*` → `"en"`, `pl*` → `"pl"`
//! 5. Otherwise the first two characters of the whole tag, lowercased (`"x-foo"` → `"x-"`)
//!
//! The table is closed but easy to extend. It is not a locale resolver.

/// The bridge language used for pivot translation and as the fallback code.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Full language names some recognizers report instead of ISO codes.
const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("english", "en"),
    ("norwegian", "no"),
    ("bokmål", "no"),
    ("bokmal", "no"),
    ("nynorsk", "no"),
    ("polish", "pl"),
];

/// Norwegian written standards that all share the "no" translation models.
const NORWEGIAN_VARIANTS: &[&str] = &["nb", "nn", "no"];

/// Normalize an optional language tag to its canonical two-letter form.
///
/// ## Guarantees:
/// - **Total**: every input produces a code, absent input produces `"en"`
/// - **Idempotent**: `normalize(Some(&normalize(x))) == normalize(x)`
///
/// ## Example:
/// ```text
/// assert_eq!(normalize(Some("NB-no")), "no");
/// assert_eq!(normalize(None), "en");
/// ```
pub fn normalize(tag: Option<&str>) -> String {
    let lowered = match tag.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_lowercase(),
        _ => return DEFAULT_LANGUAGE.to_string(),
    };

    let primary = lowered
        .split(|c| c == '-' || c == '_')
        .next()
        .unwrap_or_default();

    if let Some((_, code)) = LANGUAGE_NAMES.iter().find(|(name, _)| *name == primary) {
        return code.to_string();
    }

    let primary_prefix: String = primary.chars().take(2).collect();
    if NORWEGIAN_VARIANTS.contains(&primary_prefix.as_str()) {
        return "no".to_string();
    }

    let prefix: String = lowered.chars().take(2).collect();
    if prefix == "en" {
        return "en".to_string();
    }
    if prefix == "pl" {
        return "pl".to_string();
    }

    prefix.trim_end().to_string()
}

/// Convenience wrapper for call sites holding a plain `&str`.
pub fn normalize_str(tag: &str) -> String {
    normalize(Some(tag))
}
