use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use netdiag_core::{export, PortProber, ProbeResult, ServiceTable};
use port_scan::ScanSession;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
use config::overlay;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

fn format_from_config(s: Option<String>) -> Option<OutputFormat> {
    s.and_then(|v| OutputFormat::from_str(&v, true).ok())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ModeArg { Icmp, Tcp }

impl From<ModeArg> for trace::TraceMode {
    fn from(m: ModeArg) -> Self {
        match m { ModeArg::Icmp => trace::TraceMode::Icmp, ModeArg::Tcp => trace::TraceMode::Tcp }
    }
}

#[derive(Debug, Parser)]
#[command(name = "netdiag", version, about = "Network diagnostics: port scans, traces, pings and URL checks")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./netdiag.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Target host or IP
    host: String,
    /// Ports: comma/range list (e.g., 22,80,443 or 1-1024,8080)
    #[arg(long, conflicts_with_all = ["start", "end", "top"])]
    ports: Option<String>,
    /// First port of a contiguous range
    #[arg(long, requires = "end")]
    start: Option<u32>,
    /// Last port of a contiguous range (inclusive)
    #[arg(long, requires = "start")]
    end: Option<u32>,
    /// Scan the N most common ports
    #[arg(long, conflicts_with_all = ["start", "end"])]
    top: Option<usize>,
    /// Probe over UDP instead of TCP connect
    #[arg(long, default_value_t = false)]
    udp: bool,
    /// Timeout per port in milliseconds
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,
    /// Max probes in flight
    #[arg(long, default_value_t = 50)]
    concurrency: usize,
    /// Payload sent to open TCP ports or as the UDP datagram
    #[arg(long)]
    payload: Option<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Output file (overwrites)
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
    /// Write CSV to --out instead of text/json
    #[arg(long, default_value_t = false)]
    csv: bool,
    /// Only report open ports
    #[arg(long, default_value_t = false)]
    open_only: bool,
}

#[derive(Debug, Args)]
struct TraceArgs {
    host: String,
    #[arg(long, value_enum, default_value_t = ModeArg::Icmp)]
    mode: ModeArg,
    /// Port for TCP mode
    #[arg(long, default_value_t = 80)]
    port: u16,
    #[arg(long, default_value_t = 30)]
    max_hops: u32,
    /// Timeout per echo in milliseconds
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
    /// Echo attempts per hop
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// One echo per hop with a short pause between hops
    #[arg(long, default_value_t = false)]
    simple: bool,
    /// Skip reverse DNS for hop addresses
    #[arg(long, default_value_t = false)]
    no_resolve: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    csv: bool,
}

#[derive(Debug, Args)]
struct PingArgs {
    /// Hosts to ping; defaults to the local host
    hosts: Vec<String>,
    #[arg(long, default_value_t = 4)]
    count: u32,
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Echo payload size in bytes
    #[arg(long, default_value_t = 32)]
    size: usize,
    /// Pause between echoes in milliseconds
    #[arg(long, default_value_t = 200)]
    interval_ms: u64,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct UrlsArgs {
    urls: Vec<String>,
    /// File with newline-delimited URLs (comments with # and blanks ignored)
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Extra request header as "Name: value" (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,
    #[arg(long)]
    proxy: Option<String>,
    /// Accept certificates that fail validation (validity is still reported)
    #[arg(long, default_value_t = false)]
    insecure: bool,
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
    #[arg(long, default_value_t = 10)]
    concurrency: usize,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    csv: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Scan a port range or list on one host
    Scan(ScanArgs),
    /// Probe a single port
    Probe {
        host: String,
        port: u16,
        #[arg(long, default_value_t = false)]
        udp: bool,
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
        #[arg(long)]
        payload: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Discover the route to a host
    Trace(TraceArgs),
    /// Sample round-trip latency
    Ping(PingArgs),
    /// Check HTTP(S) URLs in parallel
    Urls(UrlsArgs),
    /// Fetch a site's favicon and print its mmh3 hash
    Favicon {
        url: String,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Look up the built-in port/service table
    Services {
        #[arg(long, conflicts_with = "name")]
        port: Option<u32>,
        #[arg(long)]
        name: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose { 0 => "warn", 1 => "info", 2 => "debug", _ => "trace" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = config::load_config(cli.config.as_deref()).unwrap_or_default();
    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Version => {
            println!("netdiag {} (core {})", env!("CARGO_PKG_VERSION"), netdiag_core::version());
        }
        Commands::Scan(args) => rt.block_on(scan(args, cfg.scan.unwrap_or_default()))?,
        Commands::Probe { host, port, udp, timeout_ms, payload, format } => {
            let timeout = Duration::from_millis(timeout_ms);
            let payload = payload.map(String::into_bytes);
            let r = rt.block_on(async {
                if udp {
                    probe_one(with_payload(ScanSession::udp(&host), payload).timeout(timeout), port).await
                } else {
                    probe_one(with_payload(ScanSession::tcp(&host), payload).timeout(timeout), port).await
                }
            });
            print!("{}", render(&[r], format, |r| format!("{}: {}", host, r))?);
        }
        Commands::Trace(args) => rt.block_on(trace_cmd(args, cfg.trace.unwrap_or_default()))?,
        Commands::Ping(args) => rt.block_on(ping_cmd(args, cfg.ping.unwrap_or_default()))?,
        Commands::Urls(args) => rt.block_on(urls_cmd(args, cfg.urls.unwrap_or_default()))?,
        Commands::Favicon { url, timeout_ms } => {
            let fav = rt
                .block_on(url_check::fetch_favicon(&url, Duration::from_millis(timeout_ms)))
                .ok_or_else(|| anyhow!("no favicon found for {}", url))?;
            println!("{} mmh3={} ({} bytes)", fav.url, fav.mmh3, fav.bytes.len());
        }
        Commands::Services { port, name } => services_cmd(port, name.as_deref())?,
    }
    Ok(())
}

/// Serialize `items` per `format`; `text` renders one line per item.
fn render<T: Serialize>(items: &[T], format: OutputFormat, text: impl Fn(&T) -> String) -> Result<String> {
    let mut out = match format {
        OutputFormat::Text => items.iter().map(text).collect::<Vec<_>>().join("\n"),
        OutputFormat::Json => export::to_json_pretty(items)?,
        OutputFormat::Jsonl => {
            let mut lines = Vec::with_capacity(items.len());
            for i in items { lines.push(serde_json::to_string(i)?); }
            lines.join("\n")
        }
    };
    if !out.is_empty() { out.push('\n'); }
    Ok(out)
}

fn write_or_print(s: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            let mut w = BufWriter::new(File::create(path).with_context(|| format!("cannot create {}", path.display()))?);
            w.write_all(s.as_bytes())?;
            w.flush()?;
        }
        None => print!("{}", s),
    }
    Ok(())
}

fn csv_target(csv: bool, out: Option<&Path>) -> Result<Option<&Path>> {
    match (csv, out) {
        (false, _) => Ok(None),
        (true, Some(p)) => Ok(Some(p)),
        (true, None) => bail!("--csv requires --out <file>"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    List(Vec<u16>),
    Range(u32, u32),
    Configured,
}

fn select_ports(args: &ScanArgs, cfg_ports: Option<&str>) -> Result<Selection> {
    if let Some(spec) = args.ports.as_deref() {
        return Ok(Selection::List(port_scan::parse_ports(spec)?));
    }
    if let (Some(s), Some(e)) = (args.start, args.end) {
        return Ok(Selection::Range(s, e));
    }
    if let Some(n) = args.top {
        if n == 0 { bail!("--top must be > 0"); }
        return Ok(Selection::List(port_scan::top_ports(n)));
    }
    match cfg_ports {
        Some(spec) => Ok(Selection::List(port_scan::parse_ports(spec)?)),
        None => Ok(Selection::Configured),
    }
}

fn with_payload<P: PortProber + 'static>(session: ScanSession<P>, payload: Option<Vec<u8>>) -> ScanSession<P> {
    match payload {
        Some(p) => session.payload(p),
        None => session,
    }
}

async fn probe_one<P: PortProber + 'static>(session: ScanSession<P>, port: u16) -> ProbeResult {
    session.scan_port(port).await
}

async fn run_scan<P: PortProber + 'static>(mut session: ScanSession<P>, sel: &Selection) -> Result<Vec<ProbeResult>> {
    let mut rx = session.subscribe();
    let progress = tokio::spawn(async move {
        while let Some(r) = rx.recv().await {
            debug!(port = r.port, status = %r.status, "progress");
        }
    });
    let results = match sel {
        Selection::List(ports) => session.scan_ports(ports).await?,
        Selection::Range(s, e) => session.scan_range(*s, *e).await?,
        Selection::Configured => session.scan_configured().await?,
    };
    drop(session);
    let _ = progress.await;
    Ok(results)
}

async fn scan(mut args: ScanArgs, cfg: config::ScanConfig) -> Result<()> {
    overlay(&mut args.timeout_ms, 500, cfg.timeout_ms);
    overlay(&mut args.concurrency, 50, cfg.concurrency);
    overlay(&mut args.format, OutputFormat::Text, format_from_config(cfg.format));
    let sel = select_ports(&args, cfg.ports.as_deref())?;
    let timeout = Duration::from_millis(args.timeout_ms);
    let payload = args.payload.clone().map(String::into_bytes);

    let started = Instant::now();
    let started_at = now_rfc3339();
    let mut results = if args.udp {
        let s = with_payload(ScanSession::udp(&args.host), payload).timeout(timeout).max_concurrency(args.concurrency);
        run_scan(s, &sel).await?
    } else {
        let s = with_payload(ScanSession::tcp(&args.host), payload).timeout(timeout).max_concurrency(args.concurrency);
        run_scan(s, &sel).await?
    };
    let scanned = results.len();
    if args.open_only { results.retain(ProbeResult::is_open); }
    let open = results.iter().filter(|r| r.is_open()).count();
    info!(host = %args.host, scanned, open, duration_ms = started.elapsed().as_millis() as u64, "scan done");

    if let Some(path) = csv_target(args.csv, args.out.as_deref())? {
        export::export_results_csv(path, &results)?;
        return Ok(());
    }
    let mut body = render(&results, args.format, |r| r.to_string())?;
    if args.format == OutputFormat::Text {
        body = format!(
            "{}: {} scanned, {} open ({} ms, started {})\n{}",
            args.host,
            scanned,
            open,
            started.elapsed().as_millis(),
            started_at,
            body
        );
    }
    write_or_print(&body, args.out.as_deref())
}

async fn trace_cmd(mut args: TraceArgs, cfg: config::TraceConfig) -> Result<()> {
    overlay(&mut args.max_hops, 30, cfg.max_hops);
    overlay(&mut args.timeout_ms, 3000, cfg.timeout_ms);
    overlay(&mut args.retries, 3, cfg.retries);
    overlay(&mut args.no_resolve, false, cfg.resolve_names.map(|r| !r));
    overlay(&mut args.format, OutputFormat::Text, format_from_config(cfg.format));
    let timeout = Duration::from_millis(args.timeout_ms);

    let result = if args.simple {
        if args.mode == ModeArg::Tcp { warn!("--simple always uses ICMP"); }
        trace::traceroute(&args.host, args.max_hops, timeout).await
    } else {
        let mut tr = trace::DetailedTrace::new(&args.host)
            .port(args.port)
            .max_hops(args.max_hops)
            .timeout(timeout)
            .retry_per_hop(args.retries)
            .resolve_names(!args.no_resolve);
        let mut rx = tr.subscribe();
        let live = tokio::spawn(async move {
            while let Some(hop) = rx.recv().await { info!("{}", hop); }
        });
        let t = tr.run(args.mode.into()).await;
        drop(tr);
        let _ = live.await;
        t
    };

    if let Some(path) = csv_target(args.csv, args.out.as_deref())? {
        export::export_hops_csv(path, &result.hops)?;
        return Ok(());
    }
    let body = match args.format {
        OutputFormat::Text => result.to_report(),
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(&result)?),
        OutputFormat::Jsonl => render(&result.hops, OutputFormat::Jsonl, |h| h.to_string())?,
    };
    write_or_print(&body, args.out.as_deref())
}

async fn ping_cmd(mut args: PingArgs, cfg: config::PingConfig) -> Result<()> {
    overlay(&mut args.count, 4, cfg.count);
    overlay(&mut args.timeout_ms, 1000, cfg.timeout_ms);
    overlay(&mut args.size, 32, cfg.size);
    overlay(&mut args.interval_ms, 200, cfg.interval_ms);
    let opts = ping::PingOptions {
        count: args.count,
        timeout: Duration::from_millis(args.timeout_ms),
        payload_size: args.size,
        interval: Duration::from_millis(args.interval_ms),
        ..ping::PingOptions::default()
    };
    let reports = ping::ping_many(&args.hosts, &opts).await;
    print!("{}", render(&reports, args.format, |r| r.to_report())?);
    Ok(())
}

/// `Name: value` split at the first colon.
fn parse_header(s: &str) -> Option<(String, String)> {
    let (k, v) = s.split_once(':')?;
    let k = k.trim();
    if k.is_empty() { return None; }
    Some((k.to_string(), v.trim().to_string()))
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let br = BufReader::new(File::open(path).with_context(|| format!("cannot open {}", path.display()))?);
    let mut out = Vec::new();
    for line in br.lines() {
        let line = line?;
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') { continue; }
        out.push(t.to_string());
    }
    Ok(out)
}

async fn urls_cmd(mut args: UrlsArgs, cfg: config::UrlsConfig) -> Result<()> {
    overlay(&mut args.timeout_ms, 5000, cfg.timeout_ms);
    overlay(&mut args.concurrency, 10, cfg.concurrency);
    overlay(&mut args.method, "GET".to_string(), cfg.method);
    overlay(&mut args.insecure, false, cfg.validate_certificate.map(|v| !v));
    if args.proxy.is_none() { args.proxy = cfg.proxy; }
    if args.headers.is_empty() { args.headers = cfg.headers.unwrap_or_default(); }

    let mut urls = args.urls.clone();
    if let Some(f) = &args.file { urls.extend(read_url_file(f)?); }
    if urls.is_empty() { bail!("provide URLs or --file <FILE>"); }

    let mut headers = Vec::new();
    for h in &args.headers {
        match parse_header(h) {
            Some(pair) => headers.push(pair),
            None => warn!(header = %h, "ignoring header without NAME:VALUE form"),
        }
    }
    let opts = url_check::UrlCheckOptions {
        timeout: Duration::from_millis(args.timeout_ms),
        method: args.method.clone(),
        headers,
        proxy: args.proxy.clone(),
        validate_certificate: !args.insecure,
        max_concurrency: args.concurrency,
    };
    let results = url_check::check_all(&urls, &opts).await;

    if let Some(path) = csv_target(args.csv, args.out.as_deref())? {
        let mut wtr = csv::Writer::from_writer(File::create(path)?);
        wtr.write_record(["url", "status", "success", "content_length", "certificate_valid", "resolved_ips", "elapsed_ms", "error"])?;
        for r in &results {
            let ips: Vec<String> = r.resolved_ips.iter().map(|ip| ip.to_string()).collect();
            wtr.write_record([
                r.url.clone(),
                r.status_code.map(|v| v.to_string()).unwrap_or_default(),
                r.is_success.to_string(),
                r.content_length.to_string(),
                r.certificate_valid.to_string(),
                ips.join("|"),
                r.elapsed_millis.to_string(),
                r.error_message.clone().unwrap_or_default(),
            ])?;
        }
        wtr.flush()?;
        return Ok(());
    }
    let body = render(&results, args.format, |r| match (&r.status_code, &r.error_message) {
        (_, Some(e)) => format!("{} error: {} ({} ms)", r.url, e, r.elapsed_millis),
        (Some(code), None) => format!(
            "{} {} len={} cert={} ({} ms)",
            r.url, code, r.content_length, r.certificate_valid, r.elapsed_millis
        ),
        (None, None) => format!("{} no response ({} ms)", r.url, r.elapsed_millis),
    })?;
    write_or_print(&body, args.out.as_deref())
}

fn services_cmd(port: Option<u32>, name: Option<&str>) -> Result<()> {
    let table = ServiceTable::new();
    match (port, name) {
        (Some(p), _) => println!("{} {}", p, table.lookup(p)),
        (None, Some(n)) => {
            let ports = table.ports_for(n)?;
            if ports.is_empty() { bail!("no port is registered as {}", n); }
            for p in ports { println!("{} {}", p, table.lookup(p as u32)); }
        }
        (None, None) => {
            for (p, s) in table.all() { println!("{} {}", p, s); }
        }
    }
    Ok(())
}
