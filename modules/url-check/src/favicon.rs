use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;
use url::Url;

const ICON_LINK: &str = r#"(?i)<link[^>]+rel=["'](?:shortcut icon|icon)["'][^>]*href=["']([^"']+)["']"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favicon {
    pub url: String,
    pub bytes: Vec<u8>,
    /// Shodan-style `http.favicon.hash`.
    pub mmh3: i32,
}

impl Favicon {
    fn new(url: &Url, bytes: Vec<u8>) -> Self {
        let mmh3 = favicon_hash(&bytes);
        Favicon { url: url.to_string(), bytes, mmh3 }
    }
}

/// MurmurHash3 (x86, 32-bit, seed 0) over the MIME-wrapped base64 of the icon:
/// a newline after every 76 characters and after the last line.
pub fn favicon_hash(bytes: &[u8]) -> i32 {
    let b64 = STANDARD.encode(bytes);
    let mut wrapped = String::with_capacity(b64.len() + b64.len() / 76 + 1);
    let mut i = 0;
    while i < b64.len() {
        let end = (i + 76).min(b64.len());
        wrapped.push_str(&b64[i..end]);
        wrapped.push('\n');
        i = end;
    }
    mmh3(wrapped.as_bytes())
}

fn mmh3(data: &[u8]) -> i32 {
    murmur3::murmur3_32(&mut Cursor::new(data), 0).map(|h| h as i32).unwrap_or(0)
}

/// `/favicon.ico` first, then whatever icon the root page links to.
pub async fn fetch_favicon(url: &str, timeout: Duration) -> Option<Favicon> {
    let root = Url::parse(&crate::normalize_url(url)).ok()?.join("/").ok()?;
    let client = Client::builder().timeout(timeout).build().ok()?;

    let ico = root.join("favicon.ico").ok()?;
    if let Some(bytes) = get_bytes(&client, &ico).await.filter(|b| !b.is_empty()) {
        return Some(Favicon::new(&ico, bytes));
    }
    debug!(url = %ico, "no favicon.ico, looking for an icon link");

    let html = client.get(root.clone()).send().await.ok()?.error_for_status().ok()?.text().await.ok()?;
    let href = icon_href(&html)?;
    let linked = root.join(&href).ok()?;
    let bytes = get_bytes(&client, &linked).await?;
    Some(Favicon::new(&linked, bytes))
}

fn icon_href(html: &str) -> Option<String> {
    let re = Regex::new(ICON_LINK).ok()?;
    re.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

async fn get_bytes(client: &Client, url: &Url) -> Option<Vec<u8>> {
    let resp = client.get(url.clone()).send().await.ok()?.error_for_status().ok()?;
    resp.bytes().await.ok().map(|b| b.to_vec())
}
