//! Link-extraction stage: discover outbound links in fetched pages.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use pipeline::{BoxError, Context, Processed, Processor};
use regex::Regex;
use url::Url;

use crate::payload::CrawlPayload;
use crate::privnet::PrivateNetworkDetector;

/// File extensions that cannot contain HTML content.
pub(crate) static EXCLUSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(?:jpg|jpeg|png|gif|ico|css|js)$").unwrap());

static BASE_HREF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<base.*?href\s*?=\s*?"(.*?)\s*?""#).unwrap());

static FIND_LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<a.*?href\s*?=\s*?"\s*?(.*?)\s*?".*?>"#).unwrap());

static NOFOLLOW_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)rel\s*?=\s*?"?nofollow"?"#).unwrap());

/// Pipeline stage that scans the raw page content for anchors and records
/// the retained targets on the payload.
///
/// A `<base href>` tag, if present, replaces the document URL as the
/// resolution base. Candidates are kept when they are http(s) and point at
/// the document's own host or at a public one; fragments are stripped,
/// duplicates and excluded extensions dropped, and `rel=nofollow` anchors
/// recorded separately from followable ones.
pub struct LinkExtractor {
    detector: Arc<dyn PrivateNetworkDetector>,
}

impl LinkExtractor {
    pub fn new(detector: Arc<dyn PrivateNetworkDetector>) -> Self {
        Self { detector }
    }

    async fn retain_link(&self, src_host: &str, link: &Url) -> bool {
        if !matches!(link.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = link.host_str() else {
            return false;
        };
        if host == src_host {
            return true;
        }
        matches!(self.detector.is_private(host).await, Ok(false))
    }
}

#[async_trait]
impl Processor<CrawlPayload> for LinkExtractor {
    async fn process(
        &self,
        _ctx: &Context,
        mut payload: CrawlPayload,
    ) -> Result<Processed<CrawlPayload>, BoxError> {
        let mut rel_to = Url::parse(&payload.url)?;

        let content = String::from_utf8_lossy(&payload.raw_content);

        if let Some(captures) = BASE_HREF_REGEX.captures(&content)
            && let Some(base) = resolve_url(&rel_to, &ensure_trailing_slash(&captures[1]))
        {
            rel_to = base;
        }
        let src_host = rel_to.host_str().unwrap_or_default().to_owned();

        let mut seen = HashSet::new();
        let mut follow = Vec::new();
        let mut no_follow = Vec::new();
        for captures in FIND_LINK_REGEX.captures_iter(&content) {
            let Some(mut link) = resolve_url(&rel_to, &captures[1]) else {
                continue;
            };
            if !self.retain_link(&src_host, &link).await {
                continue;
            }

            link.set_fragment(None);
            let link = link.to_string();
            if seen.contains(&link) {
                continue;
            }
            if EXCLUSION_REGEX.is_match(&link) {
                continue;
            }

            seen.insert(link.clone());
            if NOFOLLOW_REGEX.is_match(&captures[0]) {
                no_follow.push(link);
            } else {
                follow.push(link);
            }
        }

        drop(content);
        payload.links.extend(follow);
        payload.no_follow_links.extend(no_follow);

        Ok(Processed::Forward(payload))
    }
}

fn ensure_trailing_slash(s: &str) -> String {
    if s.is_empty() || s.ends_with('/') {
        s.to_owned()
    } else {
        format!("{s}/")
    }
}

fn resolve_url(rel_to: &Url, target: &str) -> Option<Url> {
    if target.is_empty() {
        return None;
    }
    rel_to.join(target).ok()
}
