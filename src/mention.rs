//! @mention extraction from request descriptions

use regex::Regex;
use std::sync::LazyLock;

static MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w@`])@([A-Za-z0-9_][A-Za-z0-9_.-]*)").expect("valid mention regex")
});

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```|`[^`\n]*`").expect("valid code regex"));

/// Parse the users mentioned in a markdown text.
///
/// Mentions inside code spans and fenced blocks are ignored. Each user is
/// returned once, in order of first mention.
pub fn parse_mentions(text: &str) -> Vec<String> {
    let prose = CODE_BLOCK.replace_all(text, " ");
    let mut users: Vec<String> = Vec::new();
    for capture in MENTION.captures_iter(&prose) {
        let name = capture[1].trim_end_matches(['.', '-']);
        if !name.is_empty() && !users.iter().any(|u| u == name) {
            users.push(name.to_string());
        }
    }
    users
}
