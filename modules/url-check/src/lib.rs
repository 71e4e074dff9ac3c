//! Batch HTTP(S) reachability checks with certificate and DNS details.

pub mod favicon;
pub mod tls;

pub use favicon::{favicon_hash, fetch_favicon, Favicon};

use anyhow::{anyhow, Context, Result};
use netdiag_core::{Deadline, Throttle, UrlResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Client, Method, Proxy};
use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tls::CertRecord;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct UrlCheckOptions {
    pub timeout: Duration,
    pub method: String,
    /// Sent in order; pairs that are not valid header syntax are dropped.
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
    pub validate_certificate: bool,
    pub max_concurrency: usize,
}

impl Default for UrlCheckOptions {
    fn default() -> Self {
        UrlCheckOptions {
            timeout: Duration::from_millis(5000),
            method: "GET".into(),
            headers: Vec::new(),
            proxy: None,
            validate_certificate: true,
            max_concurrency: 10,
        }
    }
}

/// Prefix `http://` unless the URL already names http or https.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// Check one URL. Failures land in `error_message`; this never errors out.
pub async fn check_url(url: &str, opts: &UrlCheckOptions) -> UrlResult {
    let started = Instant::now();
    let mut result = UrlResult { url: url.to_string(), ..Default::default() };
    if let Err(e) = run_check(url, opts, &mut result).await {
        result.is_success = false;
        result.error_message = Some(format!("{:#}", e));
    }
    result.elapsed_millis = started.elapsed().as_millis() as u64;
    debug!(url, status = ?result.status_code, ok = result.is_success, "url checked");
    result
}

async fn run_check(url: &str, opts: &UrlCheckOptions, result: &mut UrlResult) -> Result<()> {
    let parsed = Url::parse(&normalize_url(url)).with_context(|| format!("invalid url {}", url))?;
    let host = parsed.host_str().ok_or_else(|| anyhow!("url has no host"))?;
    let port = parsed.port_or_known_default().unwrap_or(80);
    result.resolved_ips = resolve(host, port, Deadline::after(opts.timeout)).await?;

    let method = Method::from_bytes(opts.method.trim().to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method {}", opts.method))?;
    let record = Arc::new(CertRecord::default());
    let client = build_client(opts, record.clone())?;
    let sent = client.request(method, parsed).headers(header_map(&opts.headers)).send().await;

    // Any handshake counts, including one reached by redirect from plain http.
    copy_certificate(&record, result);
    let resp = sent.context("request failed")?;
    let status = resp.status();
    result.status_code = Some(status.as_u16());
    result.is_success = status.is_success();
    result.content_length = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    Ok(())
}

fn copy_certificate(record: &CertRecord, result: &mut UrlResult) {
    result.certificate_valid = record.valid();
    result.certificate_subject = record.subject();
}

async fn resolve(host: &str, port: u16, deadline: Deadline) -> Result<Vec<IpAddr>> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }
    let addrs = deadline
        .run(tokio::net::lookup_host((bare, port)))
        .await
        .map_err(|_| anyhow!("dns lookup for {} timed out", bare))?
        .with_context(|| format!("dns lookup for {} failed", bare))?;
    let mut ips = Vec::new();
    for a in addrs {
        if !ips.contains(&a.ip()) { ips.push(a.ip()); }
    }
    Ok(ips)
}

fn build_client(opts: &UrlCheckOptions, record: Arc<CertRecord>) -> Result<Client> {
    let tls = tls::client_config(opts.validate_certificate, record)?;
    let mut builder = Client::builder()
        .timeout(opts.timeout)
        .use_preconfigured_tls(tls)
        .gzip(true)
        .brotli(true)
        .deflate(true);
    if let Some(p) = &opts.proxy {
        builder = builder.proxy(Proxy::all(p.as_str()).with_context(|| format!("invalid proxy {}", p))?);
    }
    Ok(builder.build()?)
}

fn header_map(pairs: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        match (HeaderName::from_bytes(k.trim().as_bytes()), HeaderValue::from_str(v.trim())) {
            (Ok(name), Ok(value)) => { map.append(name, value); }
            _ => debug!(header = %k, "skipping invalid header"),
        }
    }
    map
}

/// Check every distinct, non-blank URL with at most `max_concurrency` in
/// flight. Results come back in completion order.
pub async fn check_all(urls: &[String], opts: &UrlCheckOptions) -> Vec<UrlResult> {
    let mut seen = HashSet::new();
    let targets: Vec<String> = urls
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty() && seen.insert(u.to_string()))
        .map(str::to_string)
        .collect();

    check_each(targets, opts.max_concurrency, move |url| {
        let opts = opts.clone();
        async move { check_url(&url, &opts).await }
    })
    .await
}

async fn check_each<F, Fut>(targets: Vec<String>, max_concurrency: usize, check: F) -> Vec<UrlResult>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = UrlResult> + Send + 'static,
{
    let throttle = Throttle::new(max_concurrency);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles: Vec<(String, JoinHandle<()>)> = Vec::with_capacity(targets.len());
    for url in targets {
        let permit = throttle.acquire().await;
        let tx = tx.clone();
        let fut = check(url.clone());
        handles.push((url, tokio::spawn(async move {
            let _ = tx.send(fut.await);
            drop(permit);
        })));
    }

    for (url, h) in handles {
        if let Err(e) = h.await {
            warn!(url = %url, error = %e, "url check task failed");
            let _ = tx.send(UrlResult {
                url,
                error_message: Some(format!("check task failed: {}", e)),
                ..Default::default()
            });
        }
    }
    drop(tx);

    let mut out = Vec::new();
    while let Some(r) = rx.recv().await { out.push(r); }
    info!(checked = out.len(), ok = out.iter().filter(|r| r.is_success).count(), "url batch finished");
    out
}

/// Status code of a plain GET, if any response arrived.
pub async fn check_status(url: &str, timeout: Duration) -> Option<u16> {
    let opts = UrlCheckOptions { timeout, ..UrlCheckOptions::default() };
    check_url(url, &opts).await.status_code
}

/// Whether `url_or_host` presents a certificate chain that validates. Plain
/// hosts and `http://` URLs are checked over https.
pub async fn check_certificate(url_or_host: &str, timeout: Duration) -> bool {
    let s = url_or_host.trim();
    let url = if s.to_ascii_lowercase().starts_with("https://") {
        s.to_string()
    } else {
        let rest = if s.to_ascii_lowercase().starts_with("http://") { &s["http://".len()..] } else { s };
        format!("https://{}", rest)
    };
    let opts = UrlCheckOptions { timeout, validate_certificate: true, ..UrlCheckOptions::default() };
    check_url(&url, &opts).await.certificate_valid
}
