//! Tolerant HTML fragment parser for Matrix `formatted_body`.
//!
//! Produces a closed [`Node`] tree. Unknown elements become containers,
//! unclosed elements are closed at the end of input, and stray end tags are
//! ignored, so every input yields a tree.

use crate::escape::decode_entities;

/// Open elements past this depth are dropped and their content joins the
/// innermost kept element.
const MAX_DEPTH: usize = 64;

const VOID_ELEMENTS: &[&str] = &["br", "hr", "img", "input", "meta", "link", "wbr", "source"];

/// Raw element tree as parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Dom {
    Text(String),
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<Dom>,
    },
}

impl Dom {
    fn text_content(&self, out: &mut String) {
        match self {
            Dom::Text(text) => out.push_str(text),
            Dom::Element { children, .. } => {
                for child in children {
                    child.text_content(out);
                }
            }
        }
    }
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Document node the outbound writer visits.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Emphasis(Vec<Node>),
    Strong(Vec<Node>),
    Strike(Vec<Node>),
    Code(String),
    Pre {
        language: Option<String>,
        text: String,
    },
    Link {
        href: Option<String>,
        children: Vec<Node>,
    },
    Image {
        src: Option<String>,
        alt: String,
    },
    Blockquote(Vec<Node>),
    List {
        ordered: bool,
        start: u32,
        items: Vec<Vec<Node>>,
    },
    Heading {
        level: u8,
        children: Vec<Node>,
    },
    Rule,
    LineBreak,
    Spoiler {
        reason: Option<String>,
        children: Vec<Node>,
    },
    /// Quoted reply fallback; never rendered.
    ReplyFallback,
    Paragraph(Vec<Node>),
    Container(Vec<Node>),
}

/// Parses `formatted_body` into nodes.
pub fn parse(input: &str) -> Vec<Node> {
    to_nodes(&parse_dom(input))
}

/// Parses an HTML fragment into the raw element tree.
pub fn parse_dom(input: &str) -> Vec<Dom> {
    let mut root = Vec::new();
    let mut stack: Vec<Open> = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut text_start = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }
        let Some(markup) = markup_at(&input[pos..]) else {
            pos += 1;
            continue;
        };
        flush_text(&input[text_start..pos], &mut stack, &mut root);
        let len = match markup {
            Markup::Comment(len) => len,
            Markup::EndTag { tag, len } => {
                if let Some(depth) = stack.iter().rposition(|open| open.tag == tag) {
                    while stack.len() > depth {
                        close(&mut stack, &mut root);
                    }
                }
                len
            }
            Markup::StartTag(tag) => {
                let len = tag.len;
                if tag.self_closing || VOID_ELEMENTS.contains(&tag.name.as_str()) {
                    let element = Dom::Element {
                        tag: tag.name,
                        attrs: tag.attrs,
                        children: Vec::new(),
                    };
                    push(&mut stack, &mut root, element);
                } else if stack.len() < MAX_DEPTH {
                    stack.push(Open {
                        tag: tag.name,
                        attrs: tag.attrs,
                        children: Vec::new(),
                    });
                }
                len
            }
        };
        pos += len;
        text_start = pos;
    }
    flush_text(&input[text_start..], &mut stack, &mut root);
    while !stack.is_empty() {
        close(&mut stack, &mut root);
    }
    root
}

struct Open {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Dom>,
}

enum Markup {
    Comment(usize),
    EndTag { tag: String, len: usize },
    StartTag(StartTag),
}

fn markup_at(rest: &str) -> Option<Markup> {
    if rest.starts_with("<!--") {
        let len = rest.find("-->").map_or(rest.len(), |end| end + 3);
        return Some(Markup::Comment(len));
    }
    if let Some(name) = rest.strip_prefix("</") {
        let end = name.find('>')?;
        return Some(Markup::EndTag {
            tag: name[..end].trim().to_ascii_lowercase(),
            len: end + 3,
        });
    }
    if rest.as_bytes().get(1).is_some_and(u8::is_ascii_alphabetic) {
        return parse_start_tag(rest).map(Markup::StartTag);
    }
    None
}

fn close(stack: &mut Vec<Open>, root: &mut Vec<Dom>) {
    if let Some(open) = stack.pop() {
        let element = Dom::Element {
            tag: open.tag,
            attrs: open.attrs,
            children: open.children,
        };
        push(stack, root, element);
    }
}

fn push(stack: &mut [Open], root: &mut Vec<Dom>, node: Dom) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => root.push(node),
    }
}

fn flush_text(text: &str, stack: &mut [Open], root: &mut Vec<Dom>) {
    if !text.is_empty() {
        push(stack, root, Dom::Text(decode_entities(text)));
    }
}

struct StartTag {
    name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
    len: usize,
}

/// Parses `<name attr="v" ...>` at the start of `src`; `None` when the tag
/// never closes.
fn parse_start_tag(src: &str) -> Option<StartTag> {
    let bytes = src.as_bytes();
    let mut pos = 1;
    while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'-') {
        pos += 1;
    }
    let name = src[1..pos].to_ascii_lowercase();
    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        match bytes.get(pos)? {
            b'>' => {
                return Some(StartTag {
                    name,
                    attrs,
                    self_closing,
                    len: pos + 1,
                });
            }
            b'/' => {
                self_closing = true;
                pos += 1;
                continue;
            }
            _ => {}
        }

        let key_start = pos;
        while pos < bytes.len()
            && !bytes[pos].is_ascii_whitespace()
            && !matches!(bytes[pos], b'=' | b'>' | b'/')
        {
            pos += 1;
        }
        let key = src[key_start..pos].to_ascii_lowercase();
        if key.is_empty() {
            // Stray character such as a lone quote.
            pos += 1;
            continue;
        }
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let mut value = String::new();
        if bytes.get(pos) == Some(&b'=') {
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match bytes.get(pos)? {
                quote @ (b'"' | b'\'') => {
                    let close = src[pos + 1..].find(*quote as char)?;
                    value = decode_entities(&src[pos + 1..pos + 1 + close]);
                    pos += close + 2;
                }
                _ => {
                    let value_start = pos;
                    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'>'
                    {
                        pos += 1;
                    }
                    value = decode_entities(&src[value_start..pos]);
                }
            }
        }
        self_closing = false;
        attrs.push((key, value));
    }
}

fn to_nodes(dom: &[Dom]) -> Vec<Node> {
    dom.iter().filter_map(to_node).collect()
}

fn to_node(dom: &Dom) -> Option<Node> {
    let (tag, attrs, children) = match dom {
        Dom::Text(text) => return Some(Node::Text(text.clone())),
        Dom::Element {
            tag,
            attrs,
            children,
        } => (tag.as_str(), attrs.as_slice(), children.as_slice()),
    };
    let text = || {
        let mut out = String::new();
        for child in children {
            child.text_content(&mut out);
        }
        out
    };

    let node = match tag {
        "em" | "i" => Node::Emphasis(to_nodes(children)),
        "strong" | "b" => Node::Strong(to_nodes(children)),
        "del" | "s" | "strike" => Node::Strike(to_nodes(children)),
        "code" => Node::Code(text()),
        "pre" => {
            let code = children.iter().find_map(|child| match child {
                Dom::Element { tag, attrs, .. } if tag == "code" => Some((child, attrs)),
                _ => None,
            });
            match code {
                Some((code, attrs)) => {
                    let mut text = String::new();
                    code.text_content(&mut text);
                    let language = attr(attrs, "class")
                        .and_then(|class| {
                            class
                                .split_whitespace()
                                .find_map(|c| c.strip_prefix("language-"))
                        })
                        .map(str::to_string);
                    Node::Pre { language, text }
                }
                None => Node::Pre {
                    language: None,
                    text: text(),
                },
            }
        }
        "a" => Node::Link {
            href: attr(attrs, "href").map(str::to_string),
            children: to_nodes(children),
        },
        "img" => Node::Image {
            src: attr(attrs, "src").map(str::to_string),
            alt: attr(attrs, "alt")
                .or_else(|| attr(attrs, "title"))
                .unwrap_or_default()
                .to_string(),
        },
        "br" => Node::LineBreak,
        "hr" => Node::Rule,
        "blockquote" => Node::Blockquote(to_nodes(children)),
        "ul" | "ol" => Node::List {
            ordered: tag == "ol",
            start: attr(attrs, "start")
                .and_then(|start| start.trim().parse().ok())
                .unwrap_or(1),
            items: children
                .iter()
                .filter_map(|child| match child {
                    Dom::Element { tag, children, .. } if tag == "li" => Some(to_nodes(children)),
                    _ => None,
                })
                .collect(),
        },
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Node::Heading {
            level: tag[1..].parse().unwrap_or(1),
            children: to_nodes(children),
        },
        "span" if attr(attrs, "data-mx-spoiler").is_some() => Node::Spoiler {
            reason: attr(attrs, "data-mx-spoiler")
                .filter(|reason| !reason.is_empty())
                .map(str::to_string),
            children: to_nodes(children),
        },
        "mx-reply" => Node::ReplyFallback,
        "p" => Node::Paragraph(to_nodes(children)),
        "script" | "style" | "head" | "title" => return None,
        _ => Node::Container(to_nodes(children)),
    };
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Node {
        Node::Text(s.to_string())
    }

    #[test]
    fn parses_nested_inline_markup() {
        assert_eq!(
            parse("a <b>bold <i>both</i></b> &amp; c"),
            vec![
                text("a "),
                Node::Strong(vec![text("bold "), Node::Emphasis(vec![text("both")])]),
                text(" & c"),
            ]
        );
    }

    #[test]
    fn unclosed_and_stray_tags_are_tolerated() {
        assert_eq!(
            parse("<em>open</strong> end"),
            vec![Node::Emphasis(vec![text("open"), text(" end")])]
        );
    }

    #[test]
    fn bare_angle_brackets_stay_text() {
        assert_eq!(parse("1 < 2 > 0"), vec![text("1 < 2 > 0")]);
    }

    #[test]
    fn attributes_with_quotes_and_entities() {
        assert_eq!(
            parse(r#"<a href='https://x.io/?a=1&amp;b=2' title=t>x</a>"#),
            vec![Node::Link {
                href: Some("https://x.io/?a=1&b=2".into()),
                children: vec![text("x")],
            }]
        );
    }

    #[test]
    fn pre_code_keeps_language_and_text() {
        assert_eq!(
            parse("<pre><code class=\"language-rust\">fn <b>x</b>()\n</code></pre>"),
            vec![Node::Pre {
                language: Some("rust".into()),
                text: "fn x()\n".into(),
            }]
        );
    }

    #[test]
    fn lists_collect_items() {
        assert_eq!(
            parse("<ol start=\"3\"><li>a</li>\n<li>b</li></ol>"),
            vec![Node::List {
                ordered: true,
                start: 3,
                items: vec![vec![text("a")], vec![text("b")]],
            }]
        );
    }

    #[test]
    fn nesting_is_capped() {
        fn depth(nodes: &[Dom]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    Dom::Text(_) => 0,
                    Dom::Element { children, .. } => 1 + depth(children),
                })
                .max()
                .unwrap_or(0)
        }
        let input = format!("{}x{}", "<i>".repeat(5_000), "</i>".repeat(5_000));
        let dom = parse_dom(&input);
        assert_eq!(depth(&dom), MAX_DEPTH);
        let mut text = String::new();
        dom[0].text_content(&mut text);
        assert_eq!(text, "x");
    }

    #[test]
    fn void_elements_and_comments() {
        assert_eq!(
            parse("a<br>b<!-- gone --><hr/>"),
            vec![text("a"), Node::LineBreak, text("b"), Node::Rule]
        );
    }

    #[test]
    fn spoilers_and_reply_fallbacks() {
        assert_eq!(
            parse("<mx-reply><blockquote>old</blockquote></mx-reply><span data-mx-spoiler=\"plot\">x</span>"),
            vec![
                Node::ReplyFallback,
                Node::Spoiler {
                    reason: Some("plot".into()),
                    children: vec![text("x")],
                },
            ]
        );
    }
}
