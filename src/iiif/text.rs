//! Multilingual text normalization
//!
//! IIIF v3 represents all human-readable text as a language map: language
//! tag to ordered list of strings. Stored documents accumulated several
//! malformed shapes over time (bare strings, single string values, nested
//! language objects inside the value arrays), so every field passes through
//! `normalize` at the parse boundary and only the canonical shape exists
//! past it.

use serde_json::Value;
use std::collections::BTreeMap;

/// Canonical multilingual text: language tag to ordered, non-empty list of
/// strings. Empty languages are omitted entirely, never stored as `[]`.
pub type LanguageMap = BTreeMap<String, Vec<String>>;

/// Normalize an arbitrary JSON shape into a canonical language map.
///
/// Accepted inputs:
/// - bare string, mapped to the `none` language
/// - map of language to string
/// - map of language to list of strings
/// - map of language to list containing nested language objects (recovered
///   by looking up the current language, then `ja`, then `en`)
///
/// Languages that resolve to zero strings are dropped. The function is
/// idempotent: normalizing already-normalized input returns it unchanged.
pub fn normalize(input: &Value) -> LanguageMap {
    let mut out = LanguageMap::new();

    match input {
        Value::String(s) => {
            if !s.is_empty() {
                out.insert("none".to_string(), vec![s.clone()]);
            }
        }
        Value::Object(map) => {
            for (lang, value) in map {
                let entries = normalize_language_value(lang, value);
                if !entries.is_empty() {
                    out.insert(lang.clone(), entries);
                }
            }
        }
        _ => {}
    }

    out
}

/// Normalize, returning `None` when nothing survives.
pub fn normalize_opt(input: &Value) -> Option<LanguageMap> {
    let map = normalize(input);
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

fn normalize_language_value(lang: &str, value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => recover_nested(lang, obj),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Recover a string from an incorrectly nested language object.
/// Lookup order: the enclosing language key, then `ja`, then `en`.
fn recover_nested(lang: &str, obj: &serde_json::Map<String, Value>) -> Option<String> {
    for key in [lang, "ja", "en"] {
        match obj.get(key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Array(arr)) => {
                if let Some(Value::String(s)) = arr.first() {
                    return Some(s.clone());
                }
            }
            _ => {}
        }
    }
    None
}

/// Build a bilingual language map from ja/en values.
/// Empty strings are omitted; both slots may carry the same string.
pub fn bilingual(ja: &str, en: &str) -> LanguageMap {
    let mut map = LanguageMap::new();
    if !ja.is_empty() {
        map.insert("ja".to_string(), vec![ja.to_string()]);
    }
    if !en.is_empty() {
        map.insert("en".to_string(), vec![en.to_string()]);
    }
    map
}

/// Deserialize any accepted text shape into a canonical language map.
/// Every multilingual field of the stored documents funnels through this,
/// so malformed historical shapes never survive the parse boundary.
pub fn lenient<'de, D>(deserializer: D) -> std::result::Result<LanguageMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let value = Value::deserialize(deserializer)?;
    Ok(normalize(&value))
}

/// Lenient deserializer for optional multilingual fields
pub fn lenient_opt<'de, D>(deserializer: D) -> std::result::Result<Option<LanguageMap>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let value = Value::deserialize(deserializer)?;
    Ok(normalize_opt(&value))
}

/// First available display string. Priority: ja, en, none, first language.
pub fn display_text(map: &LanguageMap) -> Option<&str> {
    for lang in ["ja", "en", "none"] {
        if let Some(values) = map.get(lang) {
            if let Some(first) = values.first() {
                return Some(first);
            }
        }
    }
    map.values().next().and_then(|v| v.first()).map(|s| s.as_str())
}
