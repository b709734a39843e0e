//! Cleanup of externally supplied continuation identifiers.
//!
//! Operators usually copy a session id out of a chat message where it was
//! rendered as inline code or a fenced block, so the raw value may carry
//! backticks, a language tag, and line breaks.

const FENCE: &str = "```";

/// Strip surrounding whitespace, backtick fences, and embedded newlines.
///
/// ```
/// use agent_relay::invocation::sanitize_continuation_id;
///
/// assert_eq!(sanitize_continuation_id(" `abc123` "), "abc123");
/// assert_eq!(sanitize_continuation_id("```text\nabc123\n```"), "abc123");
/// ```
#[must_use]
pub fn sanitize_continuation_id(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix(FENCE) {
        let rest = rest.trim_end().strip_suffix(FENCE).unwrap_or(rest);
        // A first line followed by more content is a language tag.
        text = match rest.split_once('\n') {
            Some((_, body)) if !body.trim().is_empty() => body,
            _ => rest,
        };
    }

    text.chars()
        .filter(|c| !matches!(c, '`' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_owned()
}
