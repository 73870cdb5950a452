use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

use super::{mark_cached, Tool, ToolContext};
use crate::cache::{CacheRegistry, CacheValue, KeyCodec, Namespace, UrlRecord};

#[derive(Debug, Deserialize)]
struct WebFetchParams {
    /// The URL to fetch content from
    url: String,
    /// Maximum content length to return (in characters). Defaults to 50000.
    #[serde(default = "default_max_length")]
    max_length: usize,
    /// Whether to extract just the text content (strip HTML). Defaults to true.
    #[serde(default = "default_extract_text")]
    extract_text: bool,
}

fn default_max_length() -> usize {
    50000
}

fn default_extract_text() -> bool {
    true
}

/// Fetches a URL, consulting the `url` namespace first when a cache is attached.
///
/// The raw body is what gets cached, so text extraction and truncation apply
/// equally to fresh and cached pages. Rejected URLs, transport failures and
/// non-2xx responses are returned as errors, never as output.
#[derive(Default)]
pub struct WebFetchTool {
    cache: Option<Arc<CacheRegistry>>,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: Arc<CacheRegistry>) -> Self {
        Self { cache: Some(cache) }
    }

    async fn cached_page(&self, key: &str) -> Option<UrlRecord> {
        let cache = self.cache.as_ref()?;
        cache
            .get(Namespace::Url, key)
            .await
            .and_then(CacheValue::into_url)
    }

    async fn store_page(&self, key: &str, record: &UrlRecord) {
        if let Some(cache) = &self.cache {
            cache
                .put(Namespace::Url, key, CacheValue::Url(record.clone()))
                .await;
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "webfetch"
    }

    fn description(&self) -> &str {
        "Fetches content from a URL and returns it as text. \
         Can extract text from HTML pages or return raw content. \
         Useful for reading documentation, API responses, or web pages."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch content from"
                },
                "max_length": {
                    "type": "integer",
                    "description": "Maximum content length to return in characters. Defaults to 50000."
                },
                "extract_text": {
                    "type": "boolean",
                    "description": "Whether to extract just the text content (strip HTML). Defaults to true."
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: serde_json::Value, _ctx: &ToolContext<'_>) -> Result<String> {
        let params: WebFetchParams = serde_json::from_value(params)?;

        let url = url::Url::parse(&params.url)
            .with_context(|| format!("Invalid URL: {}", params.url))?;

        // Only allow http and https
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("Only HTTP and HTTPS URLs are supported");
        }

        let key = KeyCodec::url_key(url.as_str());
        if let Some(record) = self.cached_page(&key).await {
            tracing::debug!(url = %record.url, fetched_at = %record.fetched_at, "URL cache hit");
            return Ok(mark_cached(&render(&record, &params)));
        }

        // Fetch the content
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("worker-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let response = client
            .get(url.as_str())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!(
                "HTTP error: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            );
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        let record = UrlRecord {
            url: params.url.clone(),
            content: body,
            content_type,
            fetched_at: Utc::now(),
        };
        self.store_page(&key, &record).await;

        Ok(render(&record, &params))
    }
}

fn render(record: &UrlRecord, params: &WebFetchParams) -> String {
    let is_html = record
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("text/html"));

    // Extract text if requested and content is HTML
    let content = if params.extract_text && is_html {
        extract_text_from_html(&record.content)
    } else {
        record.content.clone()
    };

    // Truncate if needed
    let truncated = match content.char_indices().nth(params.max_length) {
        Some((cut, _)) => format!(
            "{}\n\n... [Content truncated at {} characters]",
            &content[..cut],
            params.max_length
        ),
        None => content,
    };

    format!(
        "Fetched {} ({} characters):\n\n{}",
        params.url,
        truncated.chars().count(),
        truncated
    )
}

struct HtmlPatterns {
    script: Regex,
    style: Regex,
    comments: Regex,
    blocks: Regex,
    tags: Regex,
    blank_lines: Regex,
}

static HTML: LazyLock<HtmlPatterns> = LazyLock::new(|| HtmlPatterns {
    script: Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script pattern"),
    style: Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("style pattern"),
    comments: Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"),
    blocks: Regex::new(r"(?i)</?(p|div|br|h[1-6]|li|tr)[^>]*>").expect("block pattern"),
    tags: Regex::new(r"<[^>]+>").expect("tag pattern"),
    blank_lines: Regex::new(r"\n\s*\n+").expect("whitespace pattern"),
});

/// Simple HTML to text extraction
fn extract_text_from_html(html: &str) -> String {
    let text = HTML.script.replace_all(html, "");
    let text = HTML.style.replace_all(&text, "");
    let text = HTML.comments.replace_all(&text, "");

    // Replace common block elements with newlines
    let text = HTML.blocks.replace_all(&text, "\n");
    let text = HTML.tags.replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    HTML.blank_lines.replace_all(&text, "\n\n").trim().to_string()
}
