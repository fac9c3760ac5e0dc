//! Shortcode table for reactions.
//!
//! Slack reports reactions by shortcode while Matrix carries the emoji
//! itself. Codes not in the table pass through as `:name:`.

const TABLE: &[(&str, &str)] = &[
    ("+1", "👍"),
    ("thumbsup", "👍"),
    ("-1", "👎"),
    ("thumbsdown", "👎"),
    ("heart", "❤️"),
    ("smile", "😄"),
    ("slightly_smiling_face", "🙂"),
    ("grinning", "😀"),
    ("joy", "😂"),
    ("laughing", "😆"),
    ("wink", "😉"),
    ("blush", "😊"),
    ("thinking_face", "🤔"),
    ("cry", "😢"),
    ("sob", "😭"),
    ("angry", "😠"),
    ("scream", "😱"),
    ("open_mouth", "😮"),
    ("eyes", "👀"),
    ("tada", "🎉"),
    ("fire", "🔥"),
    ("rocket", "🚀"),
    ("star", "⭐"),
    ("sparkles", "✨"),
    ("100", "💯"),
    ("clap", "👏"),
    ("pray", "🙏"),
    ("raised_hands", "🙌"),
    ("wave", "👋"),
    ("ok_hand", "👌"),
    ("muscle", "💪"),
    ("white_check_mark", "✅"),
    ("heavy_check_mark", "✔️"),
    ("x", "❌"),
    ("warning", "⚠️"),
    ("question", "❓"),
    ("exclamation", "❗"),
    ("bulb", "💡"),
    ("memo", "📝"),
    ("coffee", "☕"),
    ("beer", "🍺"),
    ("party_popper", "🎉"),
    ("heart_eyes", "😍"),
    ("sunglasses", "😎"),
    ("see_no_evil", "🙈"),
    ("skull", "💀"),
];

/// Maps a Slack reaction name to the emoji Matrix expects.
///
/// Skin tone modifiers (`thumbsup::skin-tone-2`) are dropped before lookup.
pub fn to_unicode(name: &str) -> String {
    let base = name.split("::").next().unwrap_or(name);
    TABLE
        .iter()
        .find(|(code, _)| *code == base)
        .map(|(_, emoji)| (*emoji).to_string())
        .unwrap_or_else(|| format!(":{name}:"))
}

/// Maps a Matrix reaction key back to a Slack reaction name.
pub fn to_shortcode(key: &str) -> String {
    if let Some(name) = key
        .strip_prefix(':')
        .and_then(|rest| rest.strip_suffix(':'))
        .filter(|name| !name.is_empty())
    {
        return name.to_string();
    }
    let normalized = strip_variation(key);
    TABLE
        .iter()
        .find(|(_, emoji)| strip_variation(emoji) == normalized)
        .map(|(code, _)| (*code).to_string())
        .unwrap_or_else(|| key.to_string())
}

fn strip_variation(s: &str) -> String {
    s.chars().filter(|c| *c != '\u{fe0f}').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_become_emoji() {
        assert_eq!(to_unicode("tada"), "🎉");
        assert_eq!(to_unicode("+1::skin-tone-3"), "👍");
    }

    #[test]
    fn unknown_codes_pass_through_wrapped() {
        assert_eq!(to_unicode("partyparrot"), ":partyparrot:");
        assert_eq!(to_shortcode(":partyparrot:"), "partyparrot");
    }

    #[test]
    fn reverse_lookup_ignores_variation_selector() {
        assert_eq!(to_shortcode("❤"), "heart");
        assert_eq!(to_shortcode("❤️"), "heart");
        assert_eq!(to_shortcode("👍"), "+1");
    }
}
