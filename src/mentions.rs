//! Mention rewriting.
//!
//! Exported content links user mentions as markdown, for example
//! `[@Jane Doe](https://osf.io/abc12/)`. The destination has its own mention
//! syntax (`@abc12`), keyed by the same five character user id.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

static MENTION_REGEX: OnceLock<Regex> = OnceLock::new();

/// Pattern matches:
/// - `[@label](http://host/abcde/)` and `[+label](https://host:5000/abcde/)`
/// - labels containing escaped brackets (`[@a\]b](...)`)
///
/// The closing `]` of the label must not be escaped. The capture is the final
/// path segment of the link, which must be exactly five `[a-z0-9]` characters.
fn get_mention_regex() -> &'static Regex {
    MENTION_REGEX.get_or_init(|| {
        Regex::new(r"\[[@|+](?:.*?[^\\\n])?\]\(https?://[a-z\d:.]+?/([a-z\d]{5})/\)")
            .expect("Invalid mention regex")
    })
}

/// Rewrite every markdown mention link to native `@id` syntax.
///
/// Content without mentions is returned unchanged (and unallocated).
pub fn rewrite_mentions(content: &str) -> Cow<'_, str> {
    get_mention_regex().replace_all(content, "@${1}")
}
