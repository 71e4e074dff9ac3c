//! Port to service-name table used to annotate probe results.

use crate::error::{DiagError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::debug;

pub const UNKNOWN_SERVICE: &str = "Unknown";

const SEED: &[(u16, &str)] = &[
    (20, "FTP Data"),
    (21, "FTP Control"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (67, "DHCP Server"),
    (68, "DHCP Client"),
    (69, "TFTP"),
    (80, "HTTP"),
    (110, "POP3"),
    (123, "NTP"),
    (143, "IMAP"),
    (161, "SNMP"),
    (162, "SNMP Trap"),
    (443, "HTTPS"),
    (445, "Microsoft-DS"),
    (465, "SMTPS"),
    (514, "Syslog"),
    (587, "SMTP Submission"),
    (636, "LDAPS"),
    (993, "IMAPS"),
    (995, "POP3S"),
    // databases
    (1433, "MSSQL"),
    (1434, "MSSQL Monitor"),
    (1521, "Oracle DB"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5432, "PostgreSQL"),
    (6379, "Redis"),
    (27017, "MongoDB"),
    // remote management
    (5900, "VNC"),
    (5985, "WinRM HTTP"),
    (5986, "WinRM HTTPS"),
    (8000, "HTTP Alternate"),
    (8080, "HTTP Proxy"),
    (8443, "HTTPS Alternate"),
    (2049, "NFS"),
    (3260, "iSCSI"),
    (5000, "UPnP / HTTP Alternate"),
    (5060, "SIP"),
    (5061, "SIP TLS"),
    (11211, "Memcached"),
];

/// Shared, append/override-only table. Readers never block each other.
///
/// Ports are taken as `u32` so callers holding wider integers get the
/// out-of-range behaviour instead of a silent truncation.
#[derive(Debug)]
pub struct ServiceTable {
    inner: RwLock<HashMap<u16, String>>,
}

impl Default for ServiceTable {
    fn default() -> Self { Self::new() }
}

impl ServiceTable {
    /// Table seeded with the built-in well-known ports.
    pub fn new() -> Self {
        let map = SEED.iter().map(|(p, n)| (*p, n.to_string())).collect();
        ServiceTable { inner: RwLock::new(map) }
    }

    pub fn empty() -> Self {
        ServiceTable { inner: RwLock::new(HashMap::new()) }
    }

    /// Total over any input: unknown or out-of-range ports give "Unknown".
    pub fn lookup(&self, port: u32) -> String {
        let Ok(p) = u16::try_from(port) else { return UNKNOWN_SERVICE.to_string() };
        match self.inner.read() {
            Ok(map) => map.get(&p).cloned().unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
            Err(_) => UNKNOWN_SERVICE.to_string(),
        }
    }

    pub fn is_known(&self, port: u32) -> bool {
        let Ok(p) = u16::try_from(port) else { return false };
        self.inner.read().map(|m| m.contains_key(&p)).unwrap_or(false)
    }

    /// Lenient registration: bad input is ignored.
    pub fn register(&self, port: u32, name: &str) {
        if let Err(e) = self.try_register(port, name) {
            debug!(port, error = %e, "service registration ignored");
        }
    }

    /// Validated registration: insert or overwrite.
    pub fn try_register(&self, port: u32, name: &str) -> Result<()> {
        let p = u16::try_from(port).map_err(|_| DiagError::InvalidArgument(format!("port {} outside 0-65535", port)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DiagError::InvalidArgument("service name must not be empty".into()));
        }
        let mut map = self.inner.write().map_err(|_| DiagError::InvalidArgument("service table poisoned".into()))?;
        map.insert(p, name.to_string());
        Ok(())
    }

    /// Snapshot copy, ordered by port.
    pub fn all(&self) -> BTreeMap<u16, String> {
        match self.inner.read() {
            Ok(map) => map.iter().map(|(k, v)| (*k, v.clone())).collect(),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Ports whose service name matches `name`, case-insensitively.
    pub fn ports_for(&self, name: &str) -> Result<Vec<u16>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DiagError::InvalidArgument("service name must not be empty".into()));
        }
        let mut ports: Vec<u16> = self
            .all()
            .into_iter()
            .filter(|(_, v)| v.eq_ignore_ascii_case(name))
            .map(|(k, _)| k)
            .collect();
        ports.sort_unstable();
        Ok(ports)
    }

    pub fn len(&self) -> usize { self.inner.read().map(|m| m.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
