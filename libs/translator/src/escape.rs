//! Escaping helpers for both markup dialects.

use unicode_segmentation::UnicodeSegmentation;

/// Escapes text for insertion into HTML element content or attribute values.
///
/// ```
/// use msp_translator::escape::html_escape;
///
/// assert_eq!(html_escape("<b>\"Tom\" & 'Jerry'</b>"), "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;");
/// ```
pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for grapheme in UnicodeSegmentation::graphemes(text, true) {
        escaped.push_str(match grapheme {
            "&" => "&amp;",
            "<" => "&lt;",
            ">" => "&gt;",
            "\"" => "&quot;",
            "'" => "&#39;",
            _ => grapheme,
        });
    }
    escaped
}

/// Escapes the three characters Slack treats as control characters.
///
/// ```
/// use msp_translator::escape::mrkdwn_escape;
///
/// assert_eq!(mrkdwn_escape("a <!channel> & b"), "a &lt;!channel&gt; &amp; b");
/// ```
pub fn mrkdwn_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Reverses Slack's escaping of `&`, `<`, and `>` in message text.
pub fn mrkdwn_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Decodes the HTML character references Matrix clients emit.
///
/// Unknown references are left untouched.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match candidate.find(';').filter(|end| *end <= 10) {
            Some(end) => match decode_reference(&candidate[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &candidate[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &candidate[1..];
                }
            },
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        numeric => {
            let code = numeric.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_restores_slack_text() {
        assert_eq!(mrkdwn_unescape("a &lt;b&gt; &amp;amp;"), "a <b> &amp;");
    }

    #[test]
    fn decodes_named_and_numeric_references() {
        assert_eq!(decode_entities("&lt;a&gt; &#65;&#x42; &amp;"), "<a> AB &");
    }

    #[test]
    fn leaves_unknown_references() {
        assert_eq!(decode_entities("fish & chips &bogus; &"), "fish & chips &bogus; &");
    }
}
