//! Text-extraction stage: reduce fetched HTML to a title and plain text.

use std::sync::LazyLock;

use async_trait::async_trait;
use pipeline::{BoxError, Context, Processed, Processor};
use regex::Regex;

use crate::payload::CrawlPayload;

static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title.*?>(.*?)</title>").unwrap());

static SCRIPT_STYLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style)\b[^>]*>.*?</(?:script|style)\s*>").unwrap()
});

static TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static REPEATED_SPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Pipeline stage that extracts the `<title>` and sanitises the page body
/// into whitespace-normalised plain text.
#[derive(Debug, Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor<CrawlPayload> for TextExtractor {
    async fn process(
        &self,
        _ctx: &Context,
        mut payload: CrawlPayload,
    ) -> Result<Processed<CrawlPayload>, BoxError> {
        let content = String::from_utf8_lossy(&payload.raw_content);

        let title = TITLE_REGEX
            .captures(&content)
            .map(|captures| sanitize(&captures[1]))
            .unwrap_or_default();
        let text = sanitize(&content);

        drop(content);
        payload.title.push_str(&title);
        payload.text_content.push_str(&text);

        Ok(Processed::Forward(payload))
    }
}

/// Strip markup, collapse whitespace runs to single spaces and decode HTML
/// entities.
fn sanitize(html: &str) -> String {
    let stripped = SCRIPT_STYLE_REGEX.replace_all(html, " ");
    let stripped = TAG_REGEX.replace_all(&stripped, " ");
    let collapsed = REPEATED_SPACE_REGEX.replace_all(&stripped, " ");
    unescape_entities(&collapsed).trim().to_string()
}

fn unescape_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        // Entities are short; cap the scan so stray ampersands in long text
        // stay cheap.
        let window = &rest[..rest.len().min(32)];
        if let Some(end) = window.find(';')
            && let Some(decoded) = decode_entity(&rest[1..end])
        {
            out.push(decoded);
            rest = &rest[end + 1..];
            continue;
        }

        out.push('&');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = entity.strip_prefix('#')?;
            let code = if let Some(hex) = num.strip_prefix(['x', 'X']) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                num.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}
