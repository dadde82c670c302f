//! ICMP echo measurement.
//!
//! Prefers native ICMP sockets (raw, then unprivileged datagram) timed
//! on a blocking thread; falls back to the system `ping` command when
//! no socket flavor is available. Output parsing for the fallback is
//! the only platform-sensitive code in the crate and stays contained
//! here.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Sequence counter so concurrent echoes to the same host stay
/// distinguishable.
static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn next_echo_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping: using native ICMP (raw socket)");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping: using native ICMP (unprivileged datagram socket)");
        return IcmpCapability::Native;
    }

    tracing::info!("ping: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Send one echo request and return the round-trip time in milliseconds.
pub async fn run_ping(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        // DNS is async; resolve before handing off to the blocking thread.
        let ip = resolve_address(address).await?;

        let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

        match result {
            Ok(latency_ms) => return Ok(latency_ms),
            Err(e) => {
                // Capability probing can pass while the actual send is
                // denied (sandboxes, missing ping_group_range).
                let detail = e.to_string();
                if detail.contains("Permission") || detail.contains("not permitted") {
                    tracing::warn!(
                        address,
                        error = %detail,
                        "native ping denied, falling back to command"
                    );
                    return run_ping_command(address, timeout).await;
                }
                return Err(e);
            }
        }
    }

    run_ping_command(address, timeout).await
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<_> = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .collect();

    addrs
        .into_iter()
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("no addresses found for {}", address)))
}

/// One blocking echo round trip, timed on the calling thread.
fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<f64, ProbeError> {
    let (domain, protocol, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, 0u8),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, 129u8),
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| ProbeError::Network(format!("failed to create ICMP socket: {}", e)))?;

    socket
        .set_read_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("failed to set timeout: {}", e)))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("failed to set timeout: {}", e)))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let (identifier, sequence) = next_echo_id();
    let packet = build_echo_request(ip, identifier, sequence);

    let start = Instant::now();

    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("failed to send: {}", e))
        }
    })?;

    // The socket may hand us unrelated ICMP traffic; keep reading until
    // our reply shows up or the timeout runs out.
    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = unsafe { MaybeUninit::uninit().assume_init() };
        let len = socket.recv(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut
            {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(format!("failed to receive: {}", e))
            }
        })?;
        // SAFETY: recv initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // Raw IPv4 sockets prepend the IP header; datagram sockets and
        // ICMPv6 deliver the ICMP message directly.
        let offset = if ip.is_ipv4() && len > 0 && buf[0] >> 4 == 4 {
            20
        } else {
            0
        };

        if len >= offset + 8 {
            let got_type = buf[offset];
            let got_id = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
            let got_seq = u16::from_be_bytes([buf[offset + 6], buf[offset + 7]]);

            if got_type == reply_type && got_id == identifier && got_seq == sequence {
                return Ok(elapsed.as_secs_f64() * 1000.0);
            }
        }
        // Not our reply, keep waiting.
    }
}

/// Build an echo request: type 8/code 0 for IPv4, type 128/code 0 for
/// ICMPv6. The kernel fills the ICMPv6 checksum; IPv4 needs ours.
fn build_echo_request(ip: IpAddr, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = if ip.is_ipv4() { 8 } else { 128 };
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    if ip.is_ipv4() {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// RFC 1071 checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;

    while i < data.len() - 1 {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }

    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Fallback: shell out to the platform `ping` for one packet.
async fn run_ping_command(address: &str, timeout: Duration) -> Result<f64, ProbeError> {
    let output = Command::new("ping")
        .args(ping_command_args(address, timeout))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout)));
    }

    parse_ping_output(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(windows)]
fn ping_command_args(address: &str, timeout: Duration) -> Vec<String> {
    // Windows takes the timeout in milliseconds.
    vec![
        "-n".to_string(),
        "1".to_string(),
        "-w".to_string(),
        timeout.as_millis().max(1).to_string(),
        address.to_string(),
    ]
}

#[cfg(not(windows))]
fn ping_command_args(address: &str, timeout: Duration) -> Vec<String> {
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        timeout.as_secs().max(1).to_string(),
        address.to_string(),
    ]
}

/// Parse ping output for the round-trip time in milliseconds.
fn parse_ping_output(output: &str) -> Result<f64, ProbeError> {
    // Per-packet line: "time=12.3 ms" (Linux/macOS), "time=12ms" or
    // "time<1ms" (Windows, also localized as 时间=12ms).
    static RE_PACKET: OnceLock<Regex> = OnceLock::new();
    let re_packet = RE_PACKET
        .get_or_init(|| Regex::new(r"(?:time|时间)[=<](?P<val>[0-9.]+)\s*ms").unwrap());

    if let Some(caps) = re_packet.captures(output) {
        if let Ok(ms) = caps["val"].parse::<f64>() {
            return Ok(ms);
        }
    }

    // Summary lines when no per-packet time is printed: take the average.
    static RE_SUMMARY: OnceLock<Regex> = OnceLock::new();
    let re_summary = RE_SUMMARY.get_or_init(|| {
        Regex::new(
            r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*[0-9.]+/(?P<avg>[0-9.]+)/",
        )
        .unwrap()
    });

    if let Some(caps) = re_summary.captures(output) {
        if let Ok(ms) = caps["avg"].parse::<f64>() {
            return Ok(ms);
        }
    }

    Err(ProbeError::Command(format!(
        "failed to parse ping output: {}",
        output
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_nonzero() {
        let mut packet = vec![0u8; 8];
        packet[0] = 8;
        packet[4] = 0x12;
        packet[5] = 0x34;
        packet[7] = 0x01;

        assert_ne!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_echo_request_v4() {
        let packet = build_echo_request("127.0.0.1".parse().unwrap(), 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
        // IPv4 checksum must be filled in.
        assert_ne!(&packet[2..4], &[0, 0]);
    }

    #[test]
    fn test_build_echo_request_v6() {
        let packet = build_echo_request("::1".parse().unwrap(), 0xbeef, 7);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[4..6], [0xbe, 0xef]);
        // Checksum left for the kernel.
        assert_eq!(&packet[2..4], &[0, 0]);
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        assert_eq!(parse_ping_output(output).unwrap(), 12.345);
    }

    #[test]
    fn test_parse_ping_output_windows() {
        let output = "Reply from 8.8.8.8: bytes=32 time=23ms TTL=117";
        assert_eq!(parse_ping_output(output).unwrap(), 23.0);

        let output = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=64";
        assert_eq!(parse_ping_output(output).unwrap(), 1.0);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        assert_eq!(parse_ping_output(output).unwrap(), 17.906);
    }

    #[test]
    fn test_parse_ping_output_linux_summary() {
        let output = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.

--- 8.8.8.8 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 12.300/12.300/12.300/0.000 ms"#;
        assert_eq!(parse_ping_output(output).unwrap(), 12.3);
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(parse_ping_output("no latency here").is_err());
    }
}
