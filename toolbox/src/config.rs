use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG: &str = "netdiag.yaml";

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct ScanConfig {
    pub ports: Option<String>,
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct TraceConfig {
    pub max_hops: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub resolve_names: Option<bool>,
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct PingConfig {
    pub count: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub size: Option<usize>,
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct UrlsConfig {
    pub timeout_ms: Option<u64>,
    pub concurrency: Option<usize>,
    pub method: Option<String>,
    pub proxy: Option<String>,
    /// `Name: value` lines, same syntax as `--header`.
    pub headers: Option<Vec<String>>,
    pub validate_certificate: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub scan: Option<ScanConfig>,
    pub trace: Option<TraceConfig>,
    pub ping: Option<PingConfig>,
    pub urls: Option<UrlsConfig>,
}

pub fn parse_config(s: &str) -> Result<Config, serde_yaml::Error> {
    serde_yaml::from_str(s)
}

/// Explicit path, else `./netdiag.yaml` when it exists. Unreadable or
/// malformed files are reported and ignored.
pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    let s = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config");
            return None;
        }
    };
    match parse_config(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed config");
            None
        }
    }
}

/// Take the config value only while the flag still holds its default.
pub fn overlay<T: PartialEq>(flag: &mut T, default: T, from_config: Option<T>) {
    if *flag == default {
        if let Some(v) = from_config { *flag = v; }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_sections() {
        let cfg = parse_config(
            r#"
scan:
  ports: "22,80"
  timeout_ms: 250
trace:
  max_hops: 12
  resolve_names: false
ping:
  count: 10
urls:
  method: HEAD
  headers: ["X-A: 1"]
"#,
        )
        .unwrap();
        let scan = cfg.scan.unwrap();
        assert_eq!(scan.ports.as_deref(), Some("22,80"));
        assert_eq!(scan.timeout_ms, Some(250));
        assert_eq!(scan.concurrency, None);
        assert_eq!(cfg.trace.unwrap().max_hops, Some(12));
        assert_eq!(cfg.ping.unwrap().count, Some(10));
        assert_eq!(cfg.urls.unwrap().headers, Some(vec!["X-A: 1".to_string()]));
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(parse_config("{}").unwrap(), Config::default());
    }

    #[test]
    fn overlay_respects_explicit_flags() {
        let mut t = 500u64;
        overlay(&mut t, 500, Some(900));
        assert_eq!(t, 900);
        let mut t = 100u64;
        overlay(&mut t, 500, Some(900));
        assert_eq!(t, 100);
        let mut t = 500u64;
        overlay(&mut t, 500, None);
        assert_eq!(t, 500);
    }

    #[test]
    fn loads_from_explicit_path() {
        let path = std::env::temp_dir().join(format!("netdiag-config-{}.yaml", std::process::id()));
        fs::write(&path, "ping:\n  count: 2\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.ping.unwrap().count, Some(2));
        fs::remove_file(&path).unwrap();
        assert!(load_config(Some(&path)).is_none());
    }
}
