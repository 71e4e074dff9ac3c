//! Single ICMPv4 echo exchange with a caller-chosen TTL.
//!
//! A raw socket is preferred because it also sees time-exceeded and
//! unreachable replies from intermediate routers. Without the privilege for
//! one, an unprivileged datagram ICMP socket is used; it only sees echo
//! replies addressed to it.

use netdiag_core::Deadline;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::trace;

const ICMP_HEADER_SIZE: usize = 8;

/// What came back for one echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Echo {
    /// The destination answered.
    EchoReply { from: IpAddr, rtt: Duration },
    /// A router on the path dropped the packet when its TTL ran out.
    TtlExpired { from: IpAddr, rtt: Duration },
    Unreachable { from: IpAddr, rtt: Duration },
    Timeout,
    Error(String),
}

impl Echo {
    pub fn rtt(&self) -> Option<Duration> {
        match self {
            Echo::EchoReply { rtt, .. } | Echo::TtlExpired { rtt, .. } | Echo::Unreachable { rtt, .. } => Some(*rtt),
            Echo::Timeout | Echo::Error(_) => None,
        }
    }

    pub fn responder(&self) -> Option<IpAddr> {
        match self {
            Echo::EchoReply { from, .. } | Echo::TtlExpired { from, .. } | Echo::Unreachable { from, .. } => Some(*from),
            Echo::Timeout | Echo::Error(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Echo::EchoReply { .. } => "Success",
            Echo::TtlExpired { .. } => "TtlExpired",
            Echo::Unreachable { .. } => "DestinationUnreachable",
            Echo::Timeout => "TimedOut",
            Echo::Error(_) => "Error",
        }
    }
}

impl fmt::Display for Echo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Echo::EchoReply { from, rtt } => write!(f, "Reply from {}: time={}ms", from, rtt.as_millis()),
            Echo::Error(msg) => write!(f, "Ping error: {}", msg),
            other => write!(f, "Request timed out ({})", other.kind()),
        }
    }
}

/// Send one echo request to `target` and wait for its answer until `deadline`.
pub async fn echo(target: IpAddr, ttl: u32, payload: &[u8], sequence: u16, deadline: Deadline) -> Echo {
    let IpAddr::V4(v4) = target else {
        return Echo::Error(format!("ICMPv6 echo is not supported ({})", target));
    };
    let payload = payload.to_vec();
    let budget = deadline.remaining();
    let identifier: u16 = rand::random();
    let task = tokio::task::spawn_blocking(move || exchange(v4, ttl, &payload, identifier, sequence, budget));
    match deadline.run(task).await {
        Ok(Ok(Ok(echo))) => echo,
        Ok(Ok(Err(e))) => Echo::Error(e.to_string()),
        Ok(Err(join)) => Echo::Error(format!("echo task failed: {}", join)),
        Err(_) => Echo::Timeout,
    }
}

fn open_socket() -> io::Result<(Socket, bool)> {
    match Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)) {
        Ok(s) => Ok((s, true)),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            trace!("raw ICMP socket denied, using datagram socket");
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).map(|s| (s, false))
        }
        Err(e) => Err(e),
    }
}

fn exchange(target: Ipv4Addr, ttl: u32, payload: &[u8], identifier: u16, sequence: u16, budget: Duration) -> io::Result<Echo> {
    let (socket, raw) = open_socket()?;
    socket.set_ttl(ttl.max(1))?;
    let request = build_echo_request(identifier, sequence, payload)?;
    let dest = SockAddr::from(SocketAddr::new(IpAddr::V4(target), 0));

    let sent = Instant::now();
    socket.send_to(&request, &dest)?;

    let mut buf = [0u8; 2048];
    loop {
        let left = budget.saturating_sub(sent.elapsed());
        if left.is_zero() { return Ok(Echo::Timeout); }
        socket.set_read_timeout(Some(left))?;
        let n = match (&socket).read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => return Ok(Echo::Timeout),
            Err(e) => return Err(e),
        };
        let rtt = sent.elapsed();
        let parsed = if raw {
            parse_raw(&buf[..n], identifier, sequence, rtt)
        } else {
            parse_icmp(&buf[..n], IpAddr::V4(target), None, sequence, rtt)
        };
        if let Some(echo) = parsed { return Ok(echo); }
        // Someone else's ICMP traffic; keep listening.
    }
}

fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; ICMP_HEADER_SIZE + payload.len()];
    let mut pkt = MutableEchoRequestPacket::new(&mut buf)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "echo buffer too small"))?;
    pkt.set_icmp_type(IcmpTypes::EchoRequest);
    pkt.set_icmp_code(IcmpCode(0));
    pkt.set_identifier(identifier);
    pkt.set_sequence_number(sequence);
    pkt.set_payload(payload);
    let checksum = IcmpPacket::new(pkt.packet())
        .map(|p| icmp::checksum(&p))
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad echo packet"))?;
    pkt.set_checksum(checksum);
    Ok(buf)
}

/// Raw sockets deliver the IPv4 header in front of the ICMP message.
fn parse_raw(data: &[u8], identifier: u16, sequence: u16, rtt: Duration) -> Option<Echo> {
    let ip = Ipv4Packet::new(data)?;
    let ihl = ip.get_header_length() as usize * 4;
    if data.len() < ihl + ICMP_HEADER_SIZE { return None; }
    parse_icmp(&data[ihl..], IpAddr::V4(ip.get_source()), Some(identifier), sequence, rtt)
}

/// Match an ICMP message against our request. `identifier` is `None` on
/// datagram sockets, where the kernel owns the identifier.
fn parse_icmp(icmp_bytes: &[u8], from: IpAddr, identifier: Option<u16>, sequence: u16, rtt: Duration) -> Option<Echo> {
    let pkt = IcmpPacket::new(icmp_bytes)?;
    match pkt.get_icmp_type() {
        IcmpTypes::EchoReply => {
            let reply = EchoReplyPacket::new(icmp_bytes)?;
            let ours = reply.get_sequence_number() == sequence && identifier.map_or(true, |id| reply.get_identifier() == id);
            ours.then_some(Echo::EchoReply { from, rtt })
        }
        IcmpTypes::TimeExceeded => quoted_matches(icmp_bytes, identifier, sequence).then_some(Echo::TtlExpired { from, rtt }),
        IcmpTypes::DestinationUnreachable => quoted_matches(icmp_bytes, identifier, sequence).then_some(Echo::Unreachable { from, rtt }),
        _ => None,
    }
}

/// Error messages quote the original IP header plus the first 8 bytes of our
/// echo request after their own 8-byte header.
fn quoted_matches(icmp_bytes: &[u8], identifier: Option<u16>, sequence: u16) -> bool {
    let Some(quoted) = icmp_bytes.get(ICMP_HEADER_SIZE..) else { return false };
    let Some(first) = quoted.first() else { return false };
    let ihl = (first & 0x0f) as usize * 4;
    let Some(orig) = quoted.get(ihl..ihl + ICMP_HEADER_SIZE) else { return false };
    if orig[0] != IcmpTypes::EchoRequest.0 { return false; }
    let id = u16::from_be_bytes([orig[4], orig[5]]);
    let seq = u16::from_be_bytes([orig[6], orig[7]]);
    seq == sequence && identifier.map_or(true, |want| id == want)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_bytes(id: u16, seq: u16) -> Vec<u8> {
        let mut b = build_echo_request(id, seq, b"abcd").unwrap();
        b[0] = 0; // echo reply
        b
    }

    fn time_exceeded_bytes(id: u16, seq: u16) -> Vec<u8> {
        let mut b = vec![11u8, 0, 0, 0, 0, 0, 0, 0];
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        b.extend_from_slice(&ip);
        b.extend_from_slice(&build_echo_request(id, seq, &[]).unwrap()[..8]);
        b
    }

    #[test]
    fn request_layout_and_checksum() {
        let b = build_echo_request(0x1234, 7, b"xyz").unwrap();
        assert_eq!(b.len(), 11);
        assert_eq!(b[0], 8);
        assert_eq!(&b[4..8], &[0x12, 0x34, 0x00, 0x07]);
        let pkt = IcmpPacket::new(&b).unwrap();
        assert_eq!(icmp::checksum(&pkt), pkt.get_checksum());
    }

    #[test]
    fn matches_own_reply_only() {
        let from: IpAddr = "10.0.0.9".parse().unwrap();
        let rtt = Duration::from_millis(3);
        let ok = parse_icmp(&reply_bytes(5, 1), from, Some(5), 1, rtt);
        assert!(matches!(ok, Some(Echo::EchoReply { .. })));
        assert!(parse_icmp(&reply_bytes(6, 1), from, Some(5), 1, rtt).is_none());
        assert!(parse_icmp(&reply_bytes(5, 2), from, Some(5), 1, rtt).is_none());
        // datagram sockets ignore the identifier
        assert!(parse_icmp(&reply_bytes(6, 1), from, None, 1, rtt).is_some());
    }

    #[test]
    fn time_exceeded_is_distinguished() {
        let from: IpAddr = "192.168.0.1".parse().unwrap();
        let echo = parse_icmp(&time_exceeded_bytes(5, 3), from, Some(5), 3, Duration::from_millis(1)).unwrap();
        assert_eq!(echo.kind(), "TtlExpired");
        assert_eq!(echo.responder(), Some(from));
        assert!(parse_icmp(&time_exceeded_bytes(5, 4), from, Some(5), 3, Duration::ZERO).is_none());
    }

    #[test]
    fn display_lines() {
        let r = Echo::EchoReply { from: "127.0.0.1".parse().unwrap(), rtt: Duration::from_millis(2) };
        assert_eq!(r.to_string(), "Reply from 127.0.0.1: time=2ms");
        assert_eq!(Echo::Timeout.to_string(), "Request timed out (TimedOut)");
        assert_eq!(Echo::Error("x".into()).to_string(), "Ping error: x");
    }

    #[tokio::test]
    async fn ipv6_is_rejected() {
        let e = echo("::1".parse().unwrap(), 64, &[], 1, Deadline::after_millis(100)).await;
        assert!(matches!(e, Echo::Error(_)));
    }
}
