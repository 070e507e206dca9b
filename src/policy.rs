//! Integration policies: which strategies apply to which branches

use crate::types::{IntegrationStrategy, PullRequest};
use serde::{Deserialize, Serialize};

/// Whitespace separated branch patterns.
///
/// `*` matches any run of characters, `?` a single one. A pattern prefixed
/// with `-` excludes matching branches. An empty set matches every branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchPatterns(String);

impl BranchPatterns {
    /// Create from a pattern string such as `"main release/* -release/old"`
    pub fn new(patterns: impl Into<String>) -> Self {
        Self(patterns.into())
    }

    /// Whether `branch` is selected by these patterns
    pub fn matches(&self, branch: &str) -> bool {
        let mut included = false;
        let mut has_includes = false;
        for pattern in self.0.split_whitespace() {
            if let Some(excluded) = pattern.strip_prefix('-') {
                if wildcard_match(excluded, branch) {
                    return false;
                }
            } else {
                has_includes = true;
                included |= wildcard_match(pattern, branch);
            }
        }
        included || !has_includes
    }
}

/// Glob match supporting `*` and `?`
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Strategies allowed for requests between matching branches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationPolicy {
    /// Target branches the policy applies to
    #[serde(default)]
    pub target_branches: BranchPatterns,
    /// Source branches the policy applies to
    #[serde(default)]
    pub source_branches: BranchPatterns,
    /// Allowed strategies; the first one is the default
    pub strategies: Vec<IntegrationStrategy>,
}

/// Strategies applicable to a request under the given policies.
///
/// The first policy matching both branches wins. Without a match, only
/// [`IntegrationStrategy::MergeAlways`] applies.
pub fn applicable_strategies(
    policies: &[IntegrationPolicy],
    request: &PullRequest,
) -> Vec<IntegrationStrategy> {
    strategies_for(policies, &request.target.branch, &request.source.branch)
}

/// Strategies applicable between a target and a source branch
pub fn strategies_for(
    policies: &[IntegrationPolicy],
    target_branch: &str,
    source_branch: &str,
) -> Vec<IntegrationStrategy> {
    policies
        .iter()
        .find(|policy| {
            !policy.strategies.is_empty()
                && policy.target_branches.matches(target_branch)
                && policy.source_branches.matches(source_branch)
        })
        .map_or_else(
            || vec![IntegrationStrategy::MergeAlways],
            |policy| policy.strategies.clone(),
        )
}
