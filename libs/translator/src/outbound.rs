//! Matrix HTML to Slack mrkdwn.
//!
//! Pills are resolved up front so the tree walk itself is synchronous.
//! [`MrkdwnWriter`] carries the list nesting depth as visitor state.

use std::collections::HashMap;

use async_trait::async_trait;
use msp_core::{MentionKind, MentionTarget, PuppetId};
use msp_telemetry::Direction;
use tracing::Instrument;

use crate::MATRIX_TO_LINK;
use crate::escape::mrkdwn_escape;
use crate::html::{self, Node};
use crate::telemetry::translate_span;

const BULLETS: [&str; 4] = ["●", "○", "■", "‣"];
const INDENT: &str = "    ";

/// Maps federated ids back to the remote entities they mirror.
#[async_trait]
pub trait OutboundResolver: Send + Sync {
    async fn mention_target(&self, federated_id: &str) -> Option<MentionTarget>;
}

/// Renders a Matrix message as Slack mrkdwn.
///
/// Without `formatted_body` the plain body is escaped and sent as is.
pub async fn format_outbound(
    puppet: PuppetId,
    body: &str,
    formatted_body: Option<&str>,
    resolver: &dyn OutboundResolver,
) -> String {
    let Some(formatted) = formatted_body else {
        return mrkdwn_escape(body);
    };
    async move {
        let nodes = html::parse(formatted);
        let mentions = resolve_mentions(puppet, &nodes, resolver).await;
        let mut writer = MrkdwnWriter::new(&mentions);
        writer.visit_all(&nodes).trim().to_string()
    }
    .instrument(translate_span(Direction::Outbound, puppet))
    .await
}

/// Federated id a pill link points at, if `href` is a pill.
pub fn pill_target(href: &str) -> Option<String> {
    let rest = href.strip_prefix(MATRIX_TO_LINK)?;
    let rest = rest.split('?').next().unwrap_or(rest);
    let first = rest.split('/').next().unwrap_or(rest);
    let decoded = urlencoding::decode(first).ok()?.into_owned();
    matches!(decoded.chars().next(), Some('@' | '#' | '!')).then_some(decoded)
}

async fn resolve_mentions(
    puppet: PuppetId,
    nodes: &[Node],
    resolver: &dyn OutboundResolver,
) -> HashMap<String, String> {
    let mut hrefs = Vec::new();
    collect_pills(nodes, &mut hrefs);

    let mut mentions = HashMap::new();
    for href in hrefs {
        if mentions.contains_key(&href) {
            continue;
        }
        let Some(federated_id) = pill_target(&href) else {
            continue;
        };
        let expected = if federated_id.starts_with('@') {
            MentionKind::User
        } else {
            MentionKind::Room
        };
        match resolver.mention_target(&federated_id).await {
            Some(target) if target.puppet == puppet && target.kind == expected => {
                let mention = match target.kind {
                    MentionKind::User => format!("<@{}>", target.remote_id),
                    MentionKind::Room => format!("<#{}>", target.remote_id),
                };
                mentions.insert(href, mention);
            }
            Some(target) => {
                tracing::debug!(
                    %federated_id,
                    target_puppet = target.puppet.0,
                    "mention belongs to another account, keeping link"
                );
            }
            None => {}
        }
    }
    mentions
}

fn collect_pills(nodes: &[Node], hrefs: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Link { href, children } => {
                if let Some(href) = href.as_deref().filter(|h| h.starts_with(MATRIX_TO_LINK)) {
                    hrefs.push(href.to_string());
                }
                collect_pills(children, hrefs);
            }
            Node::Emphasis(children)
            | Node::Strong(children)
            | Node::Strike(children)
            | Node::Blockquote(children)
            | Node::Paragraph(children)
            | Node::Container(children)
            | Node::Heading { children, .. }
            | Node::Spoiler { children, .. } => collect_pills(children, hrefs),
            Node::List { items, .. } => {
                for item in items {
                    collect_pills(item, hrefs);
                }
            }
            Node::Text(_)
            | Node::Code(_)
            | Node::Pre { .. }
            | Node::Image { .. }
            | Node::Rule
            | Node::LineBreak
            | Node::ReplyFallback => {}
        }
    }
}

/// Depth-first writer producing one string per node.
pub struct MrkdwnWriter<'a> {
    mentions: &'a HashMap<String, String>,
    list_depth: usize,
}

impl<'a> MrkdwnWriter<'a> {
    pub fn new(mentions: &'a HashMap<String, String>) -> Self {
        Self {
            mentions,
            list_depth: 0,
        }
    }

    pub fn visit_all(&mut self, nodes: &[Node]) -> String {
        nodes.iter().map(|node| self.visit(node)).collect()
    }

    pub fn visit(&mut self, node: &Node) -> String {
        match node {
            Node::Text(text) => {
                // Formatting whitespace between block elements.
                if text.contains('\n') && text.trim().is_empty() {
                    String::new()
                } else {
                    mrkdwn_escape(text)
                }
            }
            Node::Emphasis(children) => self.wrap(children, "_"),
            Node::Strong(children) => self.wrap(children, "*"),
            Node::Strike(children) => self.wrap(children, "~"),
            Node::Code(text) => format!("`{}`", mrkdwn_escape(text)),
            Node::Pre { text, .. } => {
                let body = mrkdwn_escape(text);
                let newline = if body.ends_with('\n') { "" } else { "\n" };
                format!("```\n{body}{newline}```\n")
            }
            Node::Link { href, children } => self.visit_link(href.as_deref(), children),
            Node::Image { src, alt } => match src {
                Some(src) if alt.is_empty() => format!("<{}>", mrkdwn_escape(src)),
                Some(src) => format!("<{}|{}>", mrkdwn_escape(src), mrkdwn_escape(alt)),
                None => mrkdwn_escape(alt),
            },
            Node::Blockquote(children) => {
                let content = self.visit_all(children);
                let quoted: Vec<String> = content
                    .trim()
                    .lines()
                    .map(|line| format!("> {line}"))
                    .collect();
                format!("{}\n", quoted.join("\n"))
            }
            Node::List {
                ordered,
                start,
                items,
            } => self.visit_list(*ordered, *start, items),
            Node::Heading { level, children } => {
                let content = self.visit_all(children);
                format!("*{} {}*\n", "#".repeat(usize::from(*level)), content.trim())
            }
            Node::Rule => "\n----------\n".to_string(),
            Node::LineBreak => "\n".to_string(),
            Node::Spoiler { reason, children } => {
                let content = self.visit_all(children);
                match reason {
                    Some(reason) => format!("(Spoiler for {}: {content})", mrkdwn_escape(reason)),
                    None => format!("(Spoiler: {content})"),
                }
            }
            Node::ReplyFallback => String::new(),
            Node::Paragraph(children) => format!("{}\n\n", self.visit_all(children)),
            Node::Container(children) => self.visit_all(children),
        }
    }

    /// Slack only honours markers hugging non-space text, so surrounding
    /// whitespace moves outside the markers.
    fn wrap(&mut self, children: &[Node], marker: &str) -> String {
        let content = self.visit_all(children);
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return content;
        }
        let leading = &content[..content.len() - content.trim_start().len()];
        let trailing = &content[content.trim_end().len()..];
        format!("{leading}{marker}{trimmed}{marker}{trailing}")
    }

    fn visit_link(&mut self, href: Option<&str>, children: &[Node]) -> String {
        if let Some(mention) = href.and_then(|href| self.mentions.get(href)) {
            return mention.clone();
        }
        let content = self.visit_all(children);
        match href.filter(|href| !href.is_empty()) {
            Some(href) => {
                let href = mrkdwn_escape(href);
                if content.trim().is_empty() || content == href {
                    format!("<{href}>")
                } else {
                    format!("<{href}|{content}>")
                }
            }
            None => content,
        }
    }

    fn visit_list(&mut self, ordered: bool, start: u32, items: &[Vec<Node>]) -> String {
        let bullet = BULLETS[self.list_depth % BULLETS.len()];
        let indent = INDENT.repeat(self.list_depth);
        self.list_depth += 1;
        let mut counter = start;
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let content = self.visit_all(item);
            let marker = if ordered {
                let marker = format!("{counter}.");
                counter = counter.saturating_add(1);
                marker
            } else {
                bullet.to_string()
            };
            entries.push(format!("{indent}{marker} {}", content.trim_end()));
        }
        self.list_depth -= 1;

        let body = entries.join("\n");
        if self.list_depth == 0 {
            format!("\n{body}\n\n")
        } else {
            format!("\n{body}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Directory;

    #[async_trait]
    impl OutboundResolver for Directory {
        async fn mention_target(&self, federated_id: &str) -> Option<MentionTarget> {
            let (puppet, kind, remote_id) = match federated_id {
                "@_slack_t_u1:hs" => (1, MentionKind::User, "U1"),
                "#_slack_t_c1:hs" => (1, MentionKind::Room, "C1"),
                "@_slack_t_u9:hs" => (2, MentionKind::User, "U9"),
                _ => return None,
            };
            Some(MentionTarget {
                puppet: PuppetId(puppet),
                kind,
                remote_id: remote_id.to_string(),
            })
        }
    }

    async fn render(html: &str) -> String {
        format_outbound(PuppetId(1), "fallback", Some(html), &Directory).await
    }

    #[tokio::test]
    async fn bold_and_italic_paragraph() {
        assert_eq!(
            render("<p><b>bold</b> and <i>italic</i></p>").await,
            "*bold* and _italic_"
        );
    }

    #[tokio::test]
    async fn plain_body_is_escaped() {
        let out = format_outbound(PuppetId(1), "a <b> & c", None, &Directory).await;
        assert_eq!(out, "a &lt;b&gt; &amp; c");
    }

    #[tokio::test]
    async fn pills_for_same_account_become_mentions() {
        let out = render(
            "hi <a href=\"https://matrix.to/#/@_slack_t_u1:hs\">Ann</a> in \
             <a href=\"https://matrix.to/#/%23_slack_t_c1:hs\">#general</a>",
        )
        .await;
        assert_eq!(out, "hi <@U1> in <#C1>");
    }

    #[tokio::test]
    async fn cross_account_pills_degrade_to_links() {
        let out = render("<a href=\"https://matrix.to/#/@_slack_t_u9:hs\">Zed</a>").await;
        assert_eq!(out, "<https://matrix.to/#/@_slack_t_u9:hs|Zed>");
    }

    #[tokio::test]
    async fn nested_lists_rotate_bullets() {
        let out = render(
            "intro<ul><li>one<ul><li>deep<ul><li>deeper<ul><li>deepest<ul><li>wrap</li></ul></li></ul></li></ul></li></ul></li><li>two</li></ul>after",
        )
        .await;
        insta::assert_snapshot!(out, @r"
        intro
        ● one
            ○ deep
                ■ deeper
                    ‣ deepest
                        ● wrap
        ● two

        after
        ");
    }

    #[tokio::test]
    async fn ordered_lists_honour_start() {
        let out = render("<ol start=\"4\"><li>four</li><li>five</li></ol>").await;
        assert_eq!(out, "4. four\n5. five");
    }

    #[tokio::test]
    async fn ordered_list_numbering_saturates() {
        assert_eq!(
            render("<ol start=\"4294967295\"><li>a</li><li>b</li></ol>").await,
            "4294967295. a\n4294967295. b"
        );
    }

    #[test]
    fn deeply_nested_markup_renders_on_a_worker_sized_stack() {
        let html = format!("{}x", "<b>".repeat(20_000));
        let rendered = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap()
                    .block_on(render(&html))
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(rendered.contains('x'));
    }

    #[tokio::test]
    async fn code_quotes_and_rules() {
        let out = render(
            "<pre><code class=\"language-sh\">ls &lt;dir&gt;\n</code></pre><blockquote>quoted\nline</blockquote><hr>x <code>y</code>",
        )
        .await;
        insta::assert_snapshot!(out, @r"
        ```
        ls &lt;dir&gt;
        ```
        > quoted
        > line

        ----------
        x `y`
        ");
    }

    #[tokio::test]
    async fn headings_spoilers_and_replies() {
        let out = render(
            "<mx-reply><blockquote>earlier</blockquote></mx-reply><h2>Title</h2><span data-mx-spoiler=\"ending\">he lives</span> <span data-mx-spoiler>x</span>",
        )
        .await;
        assert_eq!(
            out,
            "*## Title*\n(Spoiler for ending: he lives) (Spoiler: x)"
        );
    }

    #[tokio::test]
    async fn emphasis_keeps_whitespace_outside_markers() {
        assert_eq!(render("a<b> bold </b>b").await, "a *bold* b");
    }

    #[tokio::test]
    async fn links_with_matching_text_collapse() {
        assert_eq!(
            render("<a href=\"https://x.io\">https://x.io</a> <a href=\"https://y.io\">y</a>").await,
            "<https://x.io> <https://y.io|y>"
        );
    }

    #[test]
    fn pill_targets() {
        assert_eq!(
            pill_target("https://matrix.to/#/%21room:hs/$event?via=hs").as_deref(),
            Some("!room:hs")
        );
        assert_eq!(pill_target("https://example.com/#/@a:hs"), None);
    }
}
