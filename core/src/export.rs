//! CSV and JSON writers for scan results and hop traces.

use crate::error::Result;
use crate::models::{HopRecord, PortStatus, ProbeResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

pub const RESULTS_HEADER: [&str; 5] = ["Port", "Status", "Service", "ElapsedMilliseconds", "ErrorMessage"];
pub const HOPS_HEADER: [&str; 5] = ["Hop", "IP", "Hostname", "Status", "RTT(ms)"];

pub fn write_results_csv<W: Write>(w: W, results: &[ProbeResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(RESULTS_HEADER)?;
    for r in results {
        wtr.write_record([
            r.port.to_string(),
            r.status.to_string(),
            r.service_name.clone().unwrap_or_default(),
            r.elapsed_millis.to_string(),
            r.error_message.clone().unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_hops_csv<W: Write>(w: W, hops: &[HopRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(HOPS_HEADER)?;
    for h in hops {
        wtr.write_record([
            h.hop_index.to_string(),
            h.address.clone(),
            h.hostname.clone().unwrap_or_default(),
            h.status.to_string(),
            h.round_trip_millis.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_results_csv(path: impl AsRef<Path>, results: &[ProbeResult]) -> Result<()> {
    write_results_csv(BufWriter::new(File::create(path)?), results)
}

pub fn export_hops_csv(path: impl AsRef<Path>, hops: &[HopRecord]) -> Result<()> {
    write_hops_csv(BufWriter::new(File::create(path)?), hops)
}

/// Parse a results CSV back. Empty service/error cells come back as `None`.
pub fn read_results_csv<R: Read>(r: R) -> Result<Vec<ProbeResult>> {
    let mut rdr = csv::Reader::from_reader(r);
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let field = |i: usize| rec.get(i).unwrap_or("").to_string();
        let opt = |i: usize| Some(field(i)).filter(|s| !s.is_empty());
        let port = field(0).parse::<u16>().map_err(|e| crate::DiagError::Export(e.to_string()))?;
        let status = field(1).parse::<PortStatus>().map_err(crate::DiagError::Export)?;
        let elapsed_millis = field(3).parse::<u64>().map_err(|e| crate::DiagError::Export(e.to_string()))?;
        out.push(ProbeResult { port, status, service_name: opt(2), error_message: opt(4), elapsed_millis });
    }
    Ok(out)
}

pub fn to_json_pretty<T: Serialize>(items: &[T]) -> Result<String> {
    Ok(serde_json::to_string_pretty(items)?)
}

pub fn export_json<T: Serialize>(path: impl AsRef<Path>, items: &[T]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut w, items)?;
    w.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned, R: Read>(r: R) -> Result<Vec<T>> {
    Ok(serde_json::from_reader(r)?)
}

pub fn read_results_json<R: Read>(r: R) -> Result<Vec<ProbeResult>> {
    read_json(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HopStatus;

    fn sample() -> Vec<ProbeResult> {
        vec![
            ProbeResult::new(22, PortStatus::Closed, 500).with_service("SSH"),
            ProbeResult::new(80, PortStatus::Open, 1).with_service("HTTP"),
            ProbeResult::error(5040, "refused, retry later", 2).with_service("Unknown"),
        ]
    }

    fn triples(v: &[ProbeResult]) -> Vec<(u16, PortStatus, Option<String>)> {
        v.iter().map(|r| (r.port, r.status, r.service_name.clone())).collect()
    }

    #[test]
    fn results_csv_round_trip() {
        let mut buf = Vec::new();
        write_results_csv(&mut buf, &sample()).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Port,Status,Service,ElapsedMilliseconds,ErrorMessage\n"));
        let back = read_results_csv(buf.as_slice()).unwrap();
        assert_eq!(triples(&back), triples(&sample()));
        assert_eq!(back[2].error_message.as_deref(), Some("refused, retry later"));
    }

    #[test]
    fn results_json_round_trip() {
        let json = to_json_pretty(&sample()).unwrap();
        assert!(json.contains("\n  {"));
        let back = read_results_json(json.as_bytes()).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn hops_csv_layout() {
        let hops = vec![
            HopRecord { hop_index: 1, address: "10.0.0.1".into(), hostname: Some("gw".into()), status: HopStatus::TtlExpired, round_trip_millis: Some(3), error_message: None },
            HopRecord::unanswered(2, HopStatus::Timeout),
        ];
        let mut buf = Vec::new();
        write_hops_csv(&mut buf, &hops).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["Hop,IP,Hostname,Status,RTT(ms)", "1,10.0.0.1,gw,TtlExpired,3", "2,*,,Timeout,"]);
    }
}
