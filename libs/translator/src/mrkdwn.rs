//! Renders Slack mrkdwn to Matrix HTML.
//!
//! Input is unescaped text; every character that is not markup is HTML
//! escaped on the way out. Characters in the private use area pass through
//! untouched so callers can substitute placeholders afterwards.

use crate::escape::html_escape;

const FENCE: &str = "```";

/// Renders a whole message body.
///
/// ```
/// use msp_translator::mrkdwn::to_html;
///
/// assert_eq!(to_html("*hi* _there_"), "<strong>hi</strong> <em>there</em>");
/// ```
pub fn to_html(text: &str) -> String {
    let parts: Vec<&str> = text.split(FENCE).collect();
    let last = parts.len() - 1;
    let mut out = String::new();
    for (idx, part) in parts.iter().enumerate() {
        // Odd segments sit after an opening fence.
        let fenced = idx % 2 == 1;
        if fenced && idx < last {
            let code = part.strip_prefix('\n').unwrap_or(part);
            let code = code.strip_suffix('\n').unwrap_or(code);
            out.push_str("<pre><code>");
            out.push_str(&html_escape(code));
            out.push_str("</code></pre>");
        } else if fenced {
            // unterminated
            out.push_str(FENCE);
            out.push_str(&render_lines(part));
        } else {
            let mut part = *part;
            if idx > 0 {
                part = part.strip_prefix('\n').unwrap_or(part);
            }
            if idx < last {
                part = part.strip_suffix('\n').unwrap_or(part);
            }
            out.push_str(&render_lines(part));
        }
    }
    out
}

fn render_lines(text: &str) -> String {
    let mut out = String::new();
    let mut quote: Vec<&str> = Vec::new();
    let mut first = true;

    let flush_quote = |out: &mut String, quote: &mut Vec<&str>| {
        if quote.is_empty() {
            return;
        }
        let inner: Vec<String> = quote.iter().map(|line| render_inline(line)).collect();
        out.push_str("<blockquote>");
        out.push_str(&inner.join("<br>"));
        out.push_str("</blockquote>");
        quote.clear();
    };

    for line in text.split('\n') {
        if let Some(rest) = line.strip_prefix('>') {
            quote.push(rest.strip_prefix(' ').unwrap_or(rest));
            continue;
        }
        let had_quote = !quote.is_empty();
        flush_quote(&mut out, &mut quote);
        if !first && !had_quote {
            out.push_str("<br>");
        }
        out.push_str(&render_inline(line));
        first = false;
    }
    flush_quote(&mut out, &mut quote);
    out
}

/// Renders a single line of inline markup.
pub fn render_inline(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    inline_into(&chars, &mut out);
    out
}

fn inline_into(chars: &[char], out: &mut String) {
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '`' {
            if let Some(end) = find_from(chars, i + 1, |j| chars[j] == '`') {
                let code: String = chars[i + 1..end].iter().collect();
                out.push_str("<code>");
                out.push_str(&html_escape(&code));
                out.push_str("</code>");
                i = end + 1;
                continue;
            }
        }
        if let Some(tag) = tag_for(c) {
            if can_open(chars, i) {
                if let Some(end) =
                    find_from(chars, i + 2, |j| chars[j] == c && can_close(chars, j))
                {
                    out.push('<');
                    out.push_str(tag);
                    out.push('>');
                    inline_into(&chars[i + 1..end], out);
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                    i = end + 1;
                    continue;
                }
            }
        }
        let mut buf = [0u8; 4];
        out.push_str(&html_escape(c.encode_utf8(&mut buf)));
        i += 1;
    }
}

fn tag_for(c: char) -> Option<&'static str> {
    match c {
        '*' => Some("strong"),
        '_' => Some("em"),
        '~' => Some("del"),
        _ => None,
    }
}

fn find_from(chars: &[char], start: usize, pred: impl Fn(usize) -> bool) -> Option<usize> {
    (start..chars.len()).find(|&j| pred(j))
}

fn can_open(chars: &[char], i: usize) -> bool {
    let before_ok = i == 0 || !chars[i - 1].is_alphanumeric();
    let after_ok = chars.get(i + 1).is_some_and(|c| !c.is_whitespace());
    before_ok && after_ok
}

fn can_close(chars: &[char], j: usize) -> bool {
    let before_ok = !chars[j - 1].is_whitespace();
    let after_ok = chars.get(j + 1).is_none_or(|c| !c.is_alphanumeric());
    before_ok && after_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_styles_nest() {
        assert_eq!(
            to_html("*bold _both_* ~gone~"),
            "<strong>bold <em>both</em></strong> <del>gone</del>"
        );
    }

    #[test]
    fn underscores_inside_words_are_literal() {
        assert_eq!(to_html("snake_case_name"), "snake_case_name");
        assert_eq!(to_html("2 * 3 * 4"), "2 * 3 * 4");
    }

    #[test]
    fn code_spans_are_not_formatted() {
        assert_eq!(to_html("`*x* <y>`"), "<code>*x* &lt;y&gt;</code>");
    }

    #[test]
    fn fenced_blocks_become_pre() {
        assert_eq!(
            to_html("before\n```\nlet a = 1;\n```\nafter"),
            "before<pre><code>let a = 1;</code></pre>after"
        );
    }

    #[test]
    fn unterminated_fence_is_literal() {
        assert_eq!(to_html("a ```b"), "a ```b");
    }

    #[test]
    fn quotes_group_consecutive_lines() {
        assert_eq!(
            to_html("> one\n> two\nthree"),
            "<blockquote>one<br>two</blockquote>three"
        );
    }

    #[test]
    fn lines_are_joined_with_breaks() {
        assert_eq!(to_html("a\nb & c"), "a<br>b &amp; c");
    }

    #[test]
    fn placeholders_pass_through() {
        assert_eq!(to_html("*\u{e000}0\u{e001}*"), "<strong>\u{e000}0\u{e001}</strong>");
    }
}
