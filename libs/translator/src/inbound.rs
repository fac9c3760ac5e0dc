//! Slack to Matrix rendering.
//!
//! Text, attachments, and layout blocks are flattened into lines of
//! [`Token`]s. Entity references are resolved once per message, then the
//! token stream is rendered twice: plain text for `body`, HTML for
//! `formatted_body`. Entities are carried through the mrkdwn renderer as
//! private use placeholders so formatting may span them.

use std::collections::HashMap;

use async_trait::async_trait;
use msp_core::{
    Attachment, Block, CanonicalMessage, ContentBlock, ContextElement, PuppetId, TextObject,
};
use msp_telemetry::Direction;
use tracing::Instrument;

use crate::MATRIX_TO_LINK;
use crate::escape::{html_escape, mrkdwn_escape, mrkdwn_unescape};
use crate::mrkdwn;
use crate::telemetry::translate_span;

const BULLET: &str = "●";
const PLACEHOLDER_OPEN: char = '\u{e000}';
const PLACEHOLDER_CLOSE: char = '\u{e001}';

/// Entity resolved for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
    pub name: String,
    /// Federated id to link to; `None` renders the name without a pill.
    pub federated_id: Option<String>,
}

impl ResolvedEntity {
    pub fn new(name: impl Into<String>, federated_id: Option<String>) -> Self {
        Self {
            name: name.into(),
            federated_id,
        }
    }
}

/// Lookups needed while rendering an inbound message.
///
/// Returning `None` makes the renderer fall back to the raw Slack id.
#[async_trait]
pub trait MentionResolver: Send + Sync {
    async fn user(&self, id: &str) -> Option<ResolvedEntity>;
    async fn channel(&self, id: &str) -> Option<ResolvedEntity>;
    async fn usergroup(&self, id: &str) -> Option<ResolvedEntity>;
    /// Re-hosts a remote image and returns its federated media URL.
    async fn upload(&self, url: &str) -> Option<String>;
}

/// Rendered message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formatted {
    pub body: String,
    pub html: String,
}

impl Formatted {
    pub fn into_message(self, emote: bool) -> CanonicalMessage {
        CanonicalMessage {
            body: self.body,
            formatted_body: Some(self.html),
            emote,
        }
    }
}

/// True when an edit leaves the text unchanged or was written by the bridge.
pub fn is_noop_edit(previous: Option<&str>, current: Option<&str>) -> bool {
    previous == current || current.is_some_and(msp_core::is_self_sent)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Broadcast,
    User(String),
    Channel(String),
    Usergroup(String),
    Link { url: String, label: Option<String> },
    ColorOpen(String),
    ColorClose,
    Rule,
    Image { url: String, alt: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefKind {
    User,
    Channel,
    Usergroup,
}

/// Renders message content into the canonical plain/HTML pair.
pub async fn format_inbound(
    puppet: PuppetId,
    content: &[ContentBlock],
    resolver: &dyn MentionResolver,
) -> Formatted {
    async move {
        let tokens = flatten(content);
        let resolved = resolve(&tokens, resolver).await;
        Formatted {
            body: render_plain(&tokens, &resolved),
            html: render_html(&tokens, &resolved),
        }
    }
    .instrument(translate_span(Direction::Inbound, puppet))
    .await
}

#[derive(Default)]
struct Resolved {
    entities: HashMap<(RefKind, String), Option<ResolvedEntity>>,
    uploads: HashMap<String, Option<String>>,
}

impl Resolved {
    fn entity(&self, kind: RefKind, id: &str) -> Option<&ResolvedEntity> {
        self.entities
            .get(&(kind, id.to_string()))
            .and_then(Option::as_ref)
    }
}

async fn resolve(tokens: &[Token], resolver: &dyn MentionResolver) -> Resolved {
    let mut resolved = Resolved::default();
    for token in tokens {
        let (kind, id) = match token {
            Token::User(id) => (RefKind::User, id),
            Token::Channel(id) => (RefKind::Channel, id),
            Token::Usergroup(id) => (RefKind::Usergroup, id),
            Token::Image { url, .. } => {
                if !resolved.uploads.contains_key(url) {
                    let mxc = resolver.upload(url).await;
                    resolved.uploads.insert(url.clone(), mxc);
                }
                continue;
            }
            _ => continue,
        };
        let key = (kind, id.clone());
        if resolved.entities.contains_key(&key) {
            continue;
        }
        let entity = match kind {
            RefKind::User => resolver.user(id).await,
            RefKind::Channel => resolver.channel(id).await,
            RefKind::Usergroup => resolver.usergroup(id).await,
        };
        if entity.is_none() {
            tracing::debug!(kind = ?kind, id = %id, "unresolved reference, keeping raw id");
        }
        resolved.entities.insert(key, entity);
    }
    resolved
}

fn flatten(content: &[ContentBlock]) -> Vec<Token> {
    let mut lines: Vec<Vec<Token>> = Vec::new();
    for block in content {
        match block {
            ContentBlock::Text(text) => lines.extend(text_line(text)),
            ContentBlock::Attachment(attachment) => attachment_lines(attachment, &mut lines),
            ContentBlock::Structured(block) => block_lines(block, &mut lines),
        }
    }

    let mut tokens = Vec::new();
    for (idx, line) in lines.into_iter().enumerate() {
        if idx > 0 {
            tokens.push(Token::Text("\n".into()));
        }
        tokens.extend(line);
    }
    tokens
}

fn text_line(raw: &str) -> Option<Vec<Token>> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| tokenize(trimmed))
}

fn attachment_lines(attachment: &Attachment, lines: &mut Vec<Vec<Token>>) {
    if let Some(pretext) = attachment.pretext.as_deref() {
        lines.extend(text_line(pretext));
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(author) = attachment.author_name.as_deref() {
        parts.push(match attachment.author_link.as_deref() {
            Some(link) => format!("<{link}|{author}>"),
            None => author.to_string(),
        });
    }
    if let Some(title) = attachment.title.as_deref() {
        parts.push(match attachment.title_link.as_deref() {
            Some(link) => format!("*<{link}|{title}>*"),
            None => format!("*{title}*"),
        });
    }
    if let Some(text) = attachment.text.as_deref() {
        parts.push(text.to_string());
    }
    for field in &attachment.fields {
        match (field.title.as_deref(), field.value.as_deref()) {
            (Some(title), Some(value)) => parts.push(format!("*{title}*: {value}")),
            (Some(title), None) => parts.push(format!("*{title}*")),
            (None, Some(value)) => parts.push(value.to_string()),
            (None, None) => {}
        }
    }
    if !attachment.actions.is_empty() {
        let labels: Vec<String> = attachment
            .actions
            .iter()
            .map(|action| format!("[{}]", action.text))
            .collect();
        parts.push(format!("Actions (Unsupported): {}", labels.join(" ")));
    }
    if let Some(footer) = attachment.footer.as_deref() {
        parts.push(format!("_{footer}_"));
    }

    let color = attachment.color.as_deref().and_then(normalize_color);
    for part in parts {
        let Some(body) = text_line(&part) else {
            continue;
        };
        let mut line = match &color {
            Some(color) => vec![
                Token::ColorOpen(color.clone()),
                Token::Text(BULLET.into()),
                Token::ColorClose,
                Token::Text(" ".into()),
            ],
            None => vec![Token::Text(format!("{BULLET} "))],
        };
        line.extend(body);
        lines.push(line);
    }
}

/// Maps Slack's named colors to hex and prefixes bare hex values.
fn normalize_color(color: &str) -> Option<String> {
    let hex = match color {
        "good" => "#2eb886",
        "warning" => "#daa038",
        "danger" => "#a30200",
        other => other,
    };
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("#{digits}"))
}

fn block_lines(block: &Block, lines: &mut Vec<Vec<Token>>) {
    match block {
        Block::Section { text, fields } => {
            if let Some(text) = text {
                lines.extend(text_line(&text_object(text)));
            }
            for field in fields {
                lines.extend(text_line(&text_object(field)));
            }
        }
        Block::Header { text } => {
            let text = text.text.trim();
            if !text.is_empty() {
                lines.push(tokenize(&format!("*{}*", mrkdwn_escape(text))));
            }
        }
        Block::Context { elements } => {
            let mut line: Vec<Token> = Vec::new();
            for element in elements {
                let piece = match element {
                    ContextElement::Mrkdwn { text } => tokenize(text.trim()),
                    ContextElement::PlainText { text } => tokenize(&mrkdwn_escape(text.trim())),
                    ContextElement::Image {
                        image_url,
                        alt_text,
                    } => vec![Token::Image {
                        url: image_url.clone(),
                        alt: alt_text.clone(),
                    }],
                    ContextElement::Unsupported => continue,
                };
                if piece.is_empty() {
                    continue;
                }
                if !line.is_empty() {
                    line.push(Token::Text(" ".into()));
                }
                line.extend(piece);
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Block::Divider => lines.push(vec![Token::Rule]),
        Block::Image {
            image_url,
            alt_text,
        } if !image_url.is_empty() => lines.push(vec![Token::Image {
            url: image_url.clone(),
            alt: alt_text.clone(),
        }]),
        Block::Image { .. } | Block::Unsupported => {}
    }
}

fn text_object(text: &TextObject) -> String {
    if text.is_markdown() {
        text.text.clone()
    } else {
        mrkdwn_escape(&text.text)
    }
}

/// Splits Slack text into literal runs and `<...>` references.
fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find('<') {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('>') {
            Some(end) => {
                let inner = &after[..end];
                match reference(inner) {
                    Some(Token::Text(text)) => literal.push_str(&text),
                    Some(token) => {
                        flush_literal(&mut literal, &mut tokens);
                        tokens.push(token);
                    }
                    None => {
                        literal.push('<');
                        literal.push_str(inner);
                        literal.push('>');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                literal.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    literal.push_str(rest);
    flush_literal(&mut literal, &mut tokens);
    tokens
}

fn flush_literal(literal: &mut String, tokens: &mut Vec<Token>) {
    if literal.is_empty() {
        return;
    }
    let clean: String = mrkdwn_unescape(literal)
        .chars()
        .filter(|c| !('\u{e000}'..='\u{e0ff}').contains(c))
        .collect();
    tokens.push(Token::Text(clean));
    literal.clear();
}

fn reference(inner: &str) -> Option<Token> {
    let (target, label) = match inner.split_once('|') {
        Some((target, label)) => (target, Some(label)),
        None => (inner, None),
    };
    if let Some(id) = target.strip_prefix('@') {
        return Some(Token::User(id.to_string()));
    }
    if let Some(id) = target.strip_prefix('#') {
        return Some(Token::Channel(id.to_string()));
    }
    if let Some(command) = target.strip_prefix('!') {
        if let Some(id) = command.strip_prefix("subteam^") {
            return Some(Token::Usergroup(id.to_string()));
        }
        return match command {
            "channel" | "here" | "everyone" => Some(Token::Broadcast),
            // Dates and other commands carry a display fallback.
            _ => Some(Token::Text(label.unwrap_or(command).to_string())),
        };
    }
    if target.is_empty() {
        return None;
    }
    Some(Token::Link {
        url: mrkdwn_unescape(target),
        label: label.map(mrkdwn_unescape),
    })
}

fn render_plain(tokens: &[Token], resolved: &Resolved) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Text(text) => out.push_str(text),
            Token::Broadcast => out.push_str("@room"),
            Token::User(id) => match resolved.entity(RefKind::User, id) {
                Some(user) => out.push_str(&user.name),
                None => out.push_str(id),
            },
            Token::Channel(id) => match resolved.entity(RefKind::Channel, id) {
                Some(channel) => {
                    out.push('#');
                    out.push_str(&channel.name);
                }
                None => out.push_str(id),
            },
            Token::Usergroup(id) => match resolved.entity(RefKind::Usergroup, id) {
                Some(group) => {
                    out.push('@');
                    out.push_str(&group.name);
                }
                None => out.push_str(id),
            },
            Token::Link { url, label } => match label {
                Some(label) if label != url && !url.ends_with(label.as_str()) => {
                    out.push_str(&format!("{label} ({url})"));
                }
                Some(label) => out.push_str(label),
                None => out.push_str(url),
            },
            Token::ColorOpen(_) | Token::ColorClose => {}
            Token::Rule => out.push_str("---"),
            Token::Image { url, alt } => {
                out.push_str(if alt.is_empty() { url } else { alt });
            }
        }
    }
    out
}

fn render_html(tokens: &[Token], resolved: &Resolved) -> String {
    let mut source = String::new();
    let mut fragments: Vec<String> = Vec::new();
    for token in tokens {
        if let Token::Text(text) = token {
            source.push_str(text);
            continue;
        }
        source.push(PLACEHOLDER_OPEN);
        source.push_str(&fragments.len().to_string());
        source.push(PLACEHOLDER_CLOSE);
        fragments.push(html_fragment(token, resolved));
    }
    substitute(&mrkdwn::to_html(&source), &fragments)
}

fn html_fragment(token: &Token, resolved: &Resolved) -> String {
    match token {
        Token::Text(text) => html_escape(text),
        Token::Broadcast => "@room".to_string(),
        Token::User(id) => entity_html(resolved.entity(RefKind::User, id), "", id),
        Token::Channel(id) => entity_html(resolved.entity(RefKind::Channel, id), "#", id),
        Token::Usergroup(id) => entity_html(resolved.entity(RefKind::Usergroup, id), "@", id),
        Token::Link { url, label } => format!(
            "<a href=\"{}\">{}</a>",
            html_escape(url),
            html_escape(label.as_deref().unwrap_or(url))
        ),
        Token::ColorOpen(color) => format!("<font color=\"{}\">", html_escape(color)),
        Token::ColorClose => "</font>".to_string(),
        Token::Rule => "<hr>".to_string(),
        Token::Image { url, alt } => match resolved.uploads.get(url).and_then(Option::as_ref) {
            Some(mxc) => format!(
                "<img src=\"{}\" alt=\"{}\">",
                html_escape(mxc),
                html_escape(alt)
            ),
            None => format!(
                "<a href=\"{}\">{}</a>",
                html_escape(url),
                html_escape(if alt.is_empty() { url } else { alt })
            ),
        },
    }
}

fn entity_html(entity: Option<&ResolvedEntity>, sigil: &str, raw_id: &str) -> String {
    match entity {
        Some(ResolvedEntity {
            name,
            federated_id: Some(federated_id),
        }) => format!(
            "<a href=\"{MATRIX_TO_LINK}{}\">{}</a>",
            html_escape(federated_id),
            html_escape(&format!("{sigil}{name}"))
        ),
        Some(entity) => html_escape(&format!("{sigil}{}", entity.name)),
        None => html_escape(raw_id),
    }
}

fn substitute(html: &str, fragments: &[String]) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars();
    while let Some(c) = chars.next() {
        if c != PLACEHOLDER_OPEN {
            out.push(c);
            continue;
        }
        let index: String = chars.by_ref().take_while(|c| *c != PLACEHOLDER_CLOSE).collect();
        if let Some(fragment) = index.parse::<usize>().ok().and_then(|i| fragments.get(i)) {
            out.push_str(fragment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use msp_core::{AttachmentAction, AttachmentField};

    struct Directory;

    #[async_trait]
    impl MentionResolver for Directory {
        async fn user(&self, id: &str) -> Option<ResolvedEntity> {
            match id {
                "U1" => Some(ResolvedEntity::new("Ann", Some("@_slack_t_u1:hs".into()))),
                "U2" => Some(ResolvedEntity::new(
                    "<b>\"Eve\"&</b>",
                    Some("@_slack_t_u2:hs\" onclick=\"x".into()),
                )),
                _ => None,
            }
        }

        async fn channel(&self, id: &str) -> Option<ResolvedEntity> {
            (id == "C1").then(|| ResolvedEntity::new("general", None))
        }

        async fn usergroup(&self, id: &str) -> Option<ResolvedEntity> {
            (id == "S1").then(|| ResolvedEntity::new("devs", None))
        }

        async fn upload(&self, url: &str) -> Option<String> {
            (url == "https://img/cat.png").then(|| "mxc://hs/cat".to_string())
        }
    }

    async fn render(content: Vec<ContentBlock>) -> Formatted {
        format_inbound(PuppetId(1), &content, &Directory).await
    }

    fn text(raw: &str) -> Vec<ContentBlock> {
        vec![ContentBlock::Text(raw.to_string())]
    }

    #[tokio::test]
    async fn broadcast_and_user_mention() {
        let out = render(text("<!channel> hi <@U1>")).await;
        assert_eq!(out.body, "@room hi Ann");
        assert_eq!(
            out.html,
            "@room hi <a href=\"https://matrix.to/#/@_slack_t_u1:hs\">Ann</a>"
        );
    }

    #[tokio::test]
    async fn pill_names_and_ids_are_escaped() {
        let out = render(text("hi <@U2>")).await;
        assert_eq!(out.body, "hi <b>\"Eve\"&</b>");
        insta::assert_snapshot!(out.html, @r#"hi <a href="https://matrix.to/#/@_slack_t_u2:hs&quot; onclick=&quot;x">&lt;b&gt;&quot;Eve&quot;&amp;&lt;/b&gt;</a>"#);
    }

    #[tokio::test]
    async fn unresolved_references_keep_raw_id() {
        let out = render(text("ping <@U9> in <#C9|random>")).await;
        assert_eq!(out.body, "ping U9 in C9");
        assert_eq!(out.html, "ping U9 in C9");
    }

    #[tokio::test]
    async fn channel_and_usergroup_names() {
        let out = render(text("<#C1|general> <!subteam^S1|@devs> <!here>")).await;
        assert_eq!(out.body, "#general @devs @room");
    }

    #[tokio::test]
    async fn links_and_escapes() {
        let out = render(text("see <https://x.io|docs> &amp; <https://y.io> &lt;3")).await;
        assert_eq!(out.body, "see docs (https://x.io) & https://y.io <3");
        insta::assert_snapshot!(out.html, @r#"see <a href="https://x.io">docs</a> &amp; <a href="https://y.io">https://y.io</a> &lt;3"#);
    }

    #[tokio::test]
    async fn formatting_spans_mentions() {
        let out = render(text("*hey <@U1>*")).await;
        assert_eq!(
            out.html,
            "<strong>hey <a href=\"https://matrix.to/#/@_slack_t_u1:hs\">Ann</a></strong>"
        );
    }

    #[tokio::test]
    async fn attachments_become_bullet_lines() {
        let content = vec![
            ContentBlock::Text("base".into()),
            ContentBlock::Attachment(Attachment {
                text: Some("first".into()),
                ..Default::default()
            }),
            ContentBlock::Attachment(Attachment {
                text: Some("second".into()),
                color: Some("good".into()),
                ..Default::default()
            }),
        ];
        let out = render(content).await;
        assert_eq!(out.body, "base\n● first\n● second");
        assert_eq!(out.body.lines().filter(|l| l.starts_with(BULLET)).count(), 2);
        assert_eq!(
            out.html,
            "base<br>● first<br><font color=\"#2eb886\">●</font> second"
        );
    }

    #[tokio::test]
    async fn attachment_parts_render_in_order() {
        let content = vec![ContentBlock::Attachment(Attachment {
            pretext: Some("intro".into()),
            author_name: Some("Bob".into()),
            title: Some("Report".into()),
            title_link: Some("https://r".into()),
            fields: vec![AttachmentField {
                title: Some("Status".into()),
                value: Some("ok".into()),
            }],
            actions: vec![
                AttachmentAction { text: "Yes".into() },
                AttachmentAction { text: "No".into() },
            ],
            footer: Some("bot".into()),
            color: Some("ff0000".into()),
            ..Default::default()
        })];
        let out = render(content).await;
        insta::assert_snapshot!(out.body, @r"
        intro
        ● Bob
        ● *Report (https://r)*
        ● *Status*: ok
        ● Actions (Unsupported): [Yes] [No]
        ● _bot_
        ");
        assert!(out.html.contains("<font color=\"#ff0000\">●</font> <strong><a href=\"https://r\">Report</a></strong>"));
        assert!(out.html.contains("<em>bot</em>"));
    }

    #[tokio::test]
    async fn blocks_render_sections_and_images() {
        let content = vec![
            ContentBlock::Structured(Block::Header {
                text: TextObject {
                    kind: "plain_text".into(),
                    text: "Deploy <done>".into(),
                },
            }),
            ContentBlock::Structured(Block::Section {
                text: Some(TextObject {
                    kind: "mrkdwn".into(),
                    text: "_shipped_ by <@U1>".into(),
                }),
                fields: vec![],
            }),
            ContentBlock::Structured(Block::Divider),
            ContentBlock::Structured(Block::Image {
                image_url: "https://img/cat.png".into(),
                alt_text: "cat".into(),
            }),
        ];
        let out = render(content).await;
        assert_eq!(out.body, "*Deploy <done>*\n_shipped_ by Ann\n---\ncat");
        insta::assert_snapshot!(out.html, @r#"<strong>Deploy &lt;done&gt;</strong><br><em>shipped</em> by <a href="https://matrix.to/#/@_slack_t_u1:hs">Ann</a><br><hr><br><img src="mxc://hs/cat" alt="cat">"#);
    }

    #[tokio::test]
    async fn injected_placeholders_are_stripped() {
        let out = render(text("a\u{e000}0\u{e001}b")).await;
        assert_eq!(out.body, "a0b");
        assert_eq!(out.html, "a0b");
    }

    #[test]
    fn noop_edits() {
        assert!(is_noop_edit(Some("same"), Some("same")));
        assert!(is_noop_edit(Some("old"), Some("\u{fff0}bridged")));
        assert!(!is_noop_edit(Some("old"), Some("new")));
    }
}
