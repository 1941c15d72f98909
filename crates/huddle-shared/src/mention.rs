//! Detection of the `@agent` trigger in chat text.

use std::sync::LazyLock;

use regex::Regex;

/// `@agent` as a whole word, any case. `@agentic` does not match.
static AGENT_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)@agent\b").expect("agent mention pattern"));

pub fn mentions_agent(text: &str) -> bool {
    AGENT_MENTION.is_match(text)
}

/// The query forwarded to the agent: the first mention removed, whitespace
/// trimmed.
pub fn strip_agent_mention(text: &str) -> String {
    AGENT_MENTION.replace(text, "").trim().to_string()
}
