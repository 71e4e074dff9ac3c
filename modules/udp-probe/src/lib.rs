//! UDP port probe: send a datagram, wait for anything to come back.
//!
//! Silence is reported as `Filtered`. For stateless UDP a missing reply can
//! mean open-but-quiet or dropped by a firewall, so the status is a hint only.
//! A port-unreachable answer surfaces as a refused socket error on a
//! connected socket and is reported as `Closed`.

use async_trait::async_trait;
use netdiag_core::probe::{classify_io, missing_port, PortProber};
use netdiag_core::{Deadline, PortStatus, ProbeResult, ProbeTarget, Protocol};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct UdpProber {
    /// Send the built-in service payload when the caller gives none.
    pub service_payloads: bool,
}

impl UdpProber {
    pub fn new() -> Self { UdpProber { service_payloads: true } }

    pub fn raw() -> Self { UdpProber { service_payloads: false } }
}

#[async_trait]
impl PortProber for UdpProber {
    fn protocol(&self) -> Protocol { Protocol::Udp }

    async fn probe(&self, target: &ProbeTarget, deadline: Deadline, payload: Option<&[u8]>) -> ProbeResult {
        let Some(port) = target.port else { return missing_port(target) };
        let host = target.host.as_str();
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;
        let default = if self.service_payloads && payload.is_none() { default_payload(port) } else { None };
        let data: &[u8] = payload.or(default.as_deref()).unwrap_or(&[]);

        match deadline.run(exchange(host, port, data)).await {
            Ok(Ok(n)) => {
                debug!(host, port, bytes = n, "udp reply");
                ProbeResult::new(port, PortStatus::Open, elapsed())
            }
            Ok(Err(e)) => classify_io(port, &e, elapsed()),
            Err(_) => ProbeResult::new(port, PortStatus::Filtered, elapsed()),
        }
    }
}

async fn exchange(host: &str, port: u16, data: &[u8]) -> std::io::Result<usize> {
    let addr = resolve_first(host, port).await?;
    let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let sock = UdpSocket::bind(bind).await?;
    sock.connect(addr).await?;
    sock.send(data).await?;
    let mut buf = [0u8; 1500];
    sock.recv(&mut buf).await
}

async fn resolve_first(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    let mut it = lookup_host((host, port)).await?;
    it.next().ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("failed to resolve: {}", host)))
}

/// Request that makes a well-known UDP service answer.
pub fn default_payload(port: u16) -> Option<Vec<u8>> {
    match port {
        53 => Some(build_dns_query()),
        123 => Some(build_ntp_request()),
        161 => Some(build_snmp_get("public", &[1, 3, 6, 1, 2, 1, 1, 1, 0])),
        _ => None,
    }
}

fn build_ntp_request() -> Vec<u8> {
    let mut pkt = vec![0u8; 48];
    pkt[0] = 0b00_100_011; // LI=0, VN=4, Mode=3 (client)
    pkt
}

fn build_dns_query() -> Vec<u8> {
    // A record for example.com
    let mut q = Vec::new();
    q.extend_from_slice(&0x1234u16.to_be_bytes()); // ID
    q.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    q.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    q.extend_from_slice(&[0u8; 6]); // AN/NS/AR counts
    for part in ["example", "com"] {
        q.push(part.len() as u8);
        q.extend_from_slice(part.as_bytes());
    }
    q.push(0);
    q.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    q.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN
    q
}

/// SNMP v2c GetRequest for a single OID, short-form BER lengths only.
fn build_snmp_get(community: &str, oid: &[u32]) -> Vec<u8> {
    let oid_enc = encode_oid(oid);
    let mut varbind = vec![0x06, oid_enc.len() as u8];
    varbind.extend_from_slice(&oid_enc);
    varbind.extend_from_slice(&[0x05, 0x00]); // NULL value

    let varbind = tlv(0x30, &varbind);
    let varbind_list = tlv(0x30, &varbind);

    let mut pdu = Vec::new();
    pdu.extend_from_slice(&[0x02, 0x01, 0x01]); // request-id
    pdu.extend_from_slice(&[0x02, 0x01, 0x00]); // error-status
    pdu.extend_from_slice(&[0x02, 0x01, 0x00]); // error-index
    pdu.extend_from_slice(&varbind_list);
    let pdu = tlv(0xA0, &pdu);

    let mut msg = vec![0x02, 0x01, 0x01]; // version v2c
    msg.extend_from_slice(&tlv(0x04, community.as_bytes()));
    msg.extend_from_slice(&pdu);
    tlv(0x30, &msg)
}

fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(tag);
    out.push(body.len() as u8);
    out.extend_from_slice(body);
    out
}

fn encode_oid(oid: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    if oid.len() >= 2 {
        out.push((oid[0] * 40 + oid[1]) as u8);
        for &arc in &oid[2..] { out.extend_from_slice(&encode_base128(arc)); }
    }
    out
}

fn encode_base128(mut v: u32) -> Vec<u8> {
    let mut tmp = [0u8; 5];
    let mut i = 5;
    tmp[i - 1] = (v & 0x7F) as u8;
    i -= 1;
    v >>= 7;
    while v > 0 {
        tmp[i - 1] = ((v & 0x7F) as u8) | 0x80;
        i -= 1;
        v >>= 7;
    }
    tmp[i..].to_vec()
}
