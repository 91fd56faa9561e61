//! The chapter page as a parsed, mutable document.
//!
//! The document is `Rc`-based, so a [`ChapterPage`] (and anything holding one) stays on the
//! thread that parsed it; the page agent runs on a `tokio::task::LocalSet` for that reason.

use std::path::PathBuf;

use anyhow::Context as _;
use encoding_rs::{Encoding, UTF_8};
use kuchikiki::NodeRef;
use kuchikiki::traits::TendrilSink as _;
use reqwest::header::{CONTENT_TYPE, COOKIE, USER_AGENT};
use url::Url;

use crate::site;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterKind {
    Text,
    Vip,
    Undetermined,
}

impl std::fmt::Display for ChapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChapterKind::Text => "text",
            ChapterKind::Vip => "vip",
            ChapterKind::Undetermined => "undetermined",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum PageSource {
    File(PathBuf),
    Remote(Url),
}

pub struct ChapterPage {
    document: NodeRef,
}

impl ChapterPage {
    pub fn parse(html: &str) -> Self {
        Self {
            document: kuchikiki::parse_html().one(html),
        }
    }

    pub async fn load(
        source: &PageSource,
        client: &reqwest::Client,
        user_agent: &str,
        cookie: Option<&str>,
    ) -> anyhow::Result<Self> {
        let html = match source {
            PageSource::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .with_context(|| format!("read page snapshot: {}", path.display()))?;
                decode_html(&bytes, None)
            }
            PageSource::Remote(url) => fetch_html(client, url, user_agent, cookie).await?,
        };
        Ok(Self::parse(&html))
    }

    pub fn document(&self) -> &NodeRef {
        &self.document
    }

    pub fn title_element(&self) -> Option<NodeRef> {
        select_first(&self.document, site::TITLE_SELECTOR)
    }

    pub fn content_element(&self) -> Option<NodeRef> {
        select_first(&self.document, site::CONTENT_CONTAINER_SELECTOR)
    }

    /// Classifies the chapter from the current state of the document.
    pub fn classify(&self) -> ChapterKind {
        match self.content_element() {
            Some(content) => classify_content(&content),
            None => ChapterKind::Undetermined,
        }
    }

    /// Trimmed rendered text of the title, `None` when the element is missing or blank.
    pub fn title_text(&self) -> Option<String> {
        self.title_element()
            .map(|title| rendered_text(&title))
            .filter(|text| !text.is_empty())
    }

    pub fn content_text(&self) -> Option<String> {
        self.content_element().map(|content| rendered_text(&content))
    }

    pub fn vip_image_area(&self) -> Option<NodeRef> {
        select_first(&self.document, site::VIP_IMAGE_AREA_SELECTOR)
    }

    pub fn image_placeholders(area: &NodeRef) -> Vec<NodeRef> {
        select_all(area, site::IMAGE_PLACEHOLDER_SELECTOR)
    }

    pub fn problem_images(area: &NodeRef) -> Vec<NodeRef> {
        select_all(area, site::PROBLEM_IMAGE_SELECTOR)
    }

    pub fn to_html(&self) -> String {
        self.document.to_string()
    }
}

pub fn classify_content(content: &NodeRef) -> ChapterKind {
    let is_text = has_class(content, site::TEXT_MARKER_CLASS);
    let has_vip_area = select_first(content, site::VIP_IMAGE_AREA_SELECTOR).is_some();
    tracing::debug!(is_text, has_vip_area, "classify chapter");

    if is_text {
        ChapterKind::Text
    } else if has_vip_area {
        ChapterKind::Vip
    } else {
        ChapterKind::Undetermined
    }
}

pub fn has_class(node: &NodeRef, class: &str) -> bool {
    node.as_element().is_some_and(|element| {
        element
            .attributes
            .borrow()
            .get("class")
            .is_some_and(|value| value.split_ascii_whitespace().any(|c| c == class))
    })
}

const BLOCK_ELEMENTS: &[&str] = &[
    "address",
    "article",
    "blockquote",
    "br",
    "dd",
    "div",
    "dl",
    "dt",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "hr",
    "li",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "tr",
    "ul",
];

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Text as a reader sees it: one line per block, inline ASCII whitespace collapsed, blank
/// lines dropped. Ideographic paragraph indents are kept except where the final trim removes
/// the first one.
pub fn rendered_text(node: &NodeRef) -> String {
    let mut raw = String::new();
    collect_text(node, &mut raw);

    raw.lines()
        .map(|line| line.split_ascii_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

fn collect_text(node: &NodeRef, out: &mut String) {
    for child in node.children() {
        if let Some(text) = child.as_text() {
            // Source line breaks are inline whitespace; only blocks start a new line.
            out.extend(
                text.borrow()
                    .chars()
                    .map(|c| if c == '\n' || c == '\r' { ' ' } else { c }),
            );
            continue;
        }
        let Some(element) = child.as_element() else {
            continue;
        };
        let name: &str = &element.name.local;
        if SKIPPED_ELEMENTS.contains(&name) {
            continue;
        }

        let is_block = BLOCK_ELEMENTS.contains(&name);
        if is_block {
            out.push('\n');
        }
        collect_text(&child, out);
        if is_block {
            out.push('\n');
        }
    }
}

fn select_first(node: &NodeRef, selector: &str) -> Option<NodeRef> {
    node.select_first(selector)
        .ok()
        .map(|element| element.as_node().clone())
}

fn select_all(node: &NodeRef, selector: &str) -> Vec<NodeRef> {
    match node.select(selector) {
        Ok(elements) => elements.map(|element| element.as_node().clone()).collect(),
        Err(()) => {
            tracing::warn!(selector, "invalid selector");
            Vec::new()
        }
    }
}

async fn fetch_html(
    client: &reqwest::Client,
    url: &Url,
    user_agent: &str,
    cookie: Option<&str>,
) -> anyhow::Result<String> {
    tracing::info!(url = %url, "download chapter page");

    let mut request = client.get(url.as_str()).header(USER_AGENT, user_agent);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }
    let response = request
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("chapter page request failed ({status}): {url}");
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = response.bytes().await.context("read chapter page body")?;

    Ok(decode_html(&bytes, content_type.as_deref()))
}

/// Decodes page bytes using the declared charset (header first, then `<meta>`), else UTF-8.
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> String {
    let label = content_type
        .and_then(charset_param)
        .or_else(|| sniff_meta_charset(bytes));
    let encoding = label
        .as_deref()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(encoding = used.name(), "page contained malformed sequences");
    }
    text.into_owned()
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_owned())
    })
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(2048)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let value: String = head[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!value.is_empty()).then_some(value)
}
