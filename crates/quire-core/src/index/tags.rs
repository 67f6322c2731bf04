//! Tag normalization and domain classification
//!
//! Blocks keep their tags exactly as authored in `tags_raw`: either a JSON
//! array of strings or a comma/whitespace separated list. Everything the
//! index stores is derived from that text by the functions here, so the
//! index can always be rebuilt from scratch.

use std::collections::BTreeSet;

/// Prefix marking a domain tag, e.g. `domain:work`
pub const DOMAIN_PREFIX: &str = "domain:";

/// How a block's domain tags classify it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainClass {
    Unclassified,
    Single(String),
    /// More than one domain tag
    Mixed(Vec<String>),
}

/// Normalize one tag; `None` if nothing is left
///
/// Trims, strips leading `#`, lowercases and joins inner whitespace runs
/// with `-`.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('#').trim();
    if trimmed.is_empty() {
        return None;
    }
    let joined = trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    Some(joined)
}

/// Split `tags_raw` into its authored entries, untouched apart from trimming
///
/// A JSON array is used as-is when it parses; anything else is treated as
/// a comma separated list, falling back to whitespace when there are no
/// commas. Non-string array items are ignored.
pub fn raw_entries(tags_raw: &str) -> Vec<String> {
    let text = tags_raw.trim();
    if text.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(text) {
            return values
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    let pieces: Vec<&str> = if text.contains(',') {
        text.split(',').collect()
    } else {
        text.split_whitespace().collect()
    };
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalized, de-duplicated, sorted tags of a block
pub fn parse_tags(tags_raw: &str) -> Vec<String> {
    raw_entries(tags_raw)
        .iter()
        .filter_map(|entry| normalize_tag(entry))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The domain name carried by a normalized tag, if it is a domain tag
pub fn domain_of(tag: &str) -> Option<&str> {
    tag.strip_prefix(DOMAIN_PREFIX).filter(|name| !name.is_empty())
}

/// Normalized domain tag for a document domain
pub fn domain_tag(domain: &str) -> Option<String> {
    let name = normalize_tag(domain)?;
    Some(format!("{}{}", DOMAIN_PREFIX, name))
}

/// Classify normalized tags by their domain tags
pub fn classify(tags: &[String]) -> DomainClass {
    let domains: BTreeSet<&str> = tags.iter().filter_map(|t| domain_of(t)).collect();
    let mut domains: Vec<String> = domains.into_iter().map(str::to_string).collect();
    match domains.len() {
        0 => DomainClass::Unclassified,
        1 => DomainClass::Single(domains.remove(0)),
        _ => DomainClass::Mixed(domains),
    }
}

/// Rewrite `tags_raw` for a block moving between documents
///
/// Drops every source domain tag, adds the destination's, and removes
/// duplicates; all comparisons are on normalized form, so case and `#`
/// prefixes do not matter. Other entries keep their authored spelling. The
/// result is a JSON array.
pub fn retag_for_move(tags_raw: &str, from_domains: &[&str], to_domain: Option<&str>) -> String {
    let from_tags: BTreeSet<String> = from_domains
        .iter()
        .filter_map(|domain| domain_tag(domain))
        .collect();
    let to_tag = to_domain.and_then(domain_tag);

    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();
    for entry in raw_entries(tags_raw) {
        let Some(normalized) = normalize_tag(&entry) else {
            continue;
        };
        if from_tags.contains(&normalized) {
            continue;
        }
        if seen.insert(normalized) {
            entries.push(entry);
        }
    }
    if let Some(tag) = to_tag {
        if !seen.contains(&tag) {
            entries.push(tag);
        }
    }

    serde_json::Value::from(entries).to_string()
}
