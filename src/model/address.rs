//! E-mail address extraction from raw header text.
//!
//! Addresses are pulled out with a token regex rather than a full RFC 5322
//! grammar: display names, comments and group syntax are ignored, and only
//! `local@domain.tld` tokens survive.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn address_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"[a-zA-Z0-9._-]+@[a-zA-Z0-9._-]+\.[a-zA-Z0-9_-]+")
            .expect("valid address regex")
    })
}

/// Extract every address token from a header value.
///
/// Duplicates are removed; the first occurrence keeps its position.
///
/// # Examples
/// - `"Jane Doe <jane@x.com>, john@y.org"` → `["jane@x.com", "john@y.org"]`
/// - `"\"Last, First\" <a@b.com>, a@b.com"` → `["a@b.com"]`
pub fn extract_addresses(raw: &str) -> Vec<String> {
    dedup_preserving_order(address_regex().find_iter(raw).map(|m| m.as_str().to_string()))
}

/// Remove duplicates from an iterator while keeping first-seen order.
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Join an address list into the comma-separated storage form.
pub fn join_addresses(addresses: &[String]) -> String {
    addresses.join(",")
}

/// Split the comma-separated storage form back into entries, dropping blanks.
pub fn split_addresses(joined: &str) -> impl Iterator<Item = &str> {
    joined.split(',').map(str::trim).filter(|s| !s.is_empty())
}
