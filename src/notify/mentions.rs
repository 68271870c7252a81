use regex::Regex;
use std::sync::LazyLock;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("mention regex should compile"));

/// Every username mentioned as `@name` in `content`, in order.
///
/// A name mentioned twice is returned twice.
pub fn extract_mentions(content: &str) -> Vec<&str> {
    MENTION
        .captures_iter(content)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}
