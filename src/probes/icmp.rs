//! ICMP echo probe.
//!
//! Sends a fixed burst of echo requests and reports the mean round trip.
//! Packets are built by hand and sent over a raw socket (privileged), with
//! an unprivileged DGRAM fallback. The blocking socket work runs inside
//! `spawn_blocking` to keep timing tight.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

use super::{ProbeReport, ICMP_DEADLINE, ICMP_ECHO_COUNT};

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

pub async fn probe(target: &str) -> ProbeReport {
    match ping(target).await {
        Ok(avg_ms) => ProbeReport {
            delay: avg_ms,
            successful: true,
            data: String::new(),
        },
        Err(err) => ProbeReport::failure(err.to_string()),
    }
}

async fn ping(target: &str) -> Result<f32> {
    let ip = resolve(target).await?;
    tokio::task::spawn_blocking(move || blocking_ping(ip))
        .await
        .map_err(|err| anyhow!("ping task failed: {err}"))?
}

async fn resolve(target: &str) -> Result<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host(format!("{target}:0"))
        .await
        .with_context(|| format!("resolve {target}"))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| anyhow!("no addresses found for {target}"))
}

fn open_socket(ip: IpAddr) -> Result<Socket> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged where permitted.
    Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .context("create ICMP socket")
}

fn blocking_ping(ip: IpAddr) -> Result<f32> {
    let socket = open_socket(ip)?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .with_context(|| format!("connect {ip}"))?;

    let identifier: u16 = rand::random();
    let deadline = Instant::now() + ICMP_DEADLINE;
    let mut total_rtt = Duration::ZERO;
    let mut received = 0u32;

    for sequence in 0..ICMP_ECHO_COUNT as u16 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket
            .set_read_timeout(Some(remaining))
            .context("set read timeout")?;

        let packet = build_echo_request(ip, identifier, sequence);
        socket.send(&packet).context("send echo request")?;

        match await_reply(&socket, ip, identifier, sequence, deadline) {
            Some(rtt) => {
                total_rtt += rtt;
                received += 1;
            }
            None => break,
        }
    }

    if received == 0 {
        return Err(anyhow!("ping {ip}: timed out"));
    }
    Ok((total_rtt.as_micros() as f32 / received as f32) / 1000.0)
}

/// Wait for the reply matching our identifier/sequence, skipping strays.
fn await_reply(
    socket: &Socket,
    ip: IpAddr,
    identifier: u16,
    sequence: u16,
    deadline: Instant,
) -> Option<Duration> {
    let sent_at = Instant::now();
    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = [MaybeUninit::uninit(); 1500];
        let len = socket.recv(&mut buf).ok()?;
        // SAFETY: recv initialized `len` bytes.
        let reply: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        let elapsed = sent_at.elapsed();

        if Instant::now() >= deadline {
            return None;
        }
        if matches_reply(ip, reply, identifier, sequence) {
            return Some(elapsed);
        }
        // Stray packet, keep waiting for ours.
    }
}

fn matches_reply(ip: IpAddr, reply: &[u8], identifier: u16, sequence: u16) -> bool {
    // RAW v4 sockets hand back the IP header; DGRAM and v6 do not.
    let offset = match ip {
        IpAddr::V4(_) if reply.first().map(|b| b >> 4) == Some(4) => 20,
        _ => 0,
    };
    if reply.len() < offset + 8 {
        return false;
    }
    let expected_type = match ip {
        IpAddr::V4(_) => ICMPV4_ECHO_REPLY,
        IpAddr::V6(_) => ICMPV6_ECHO_REPLY,
    };
    let reply_id = u16::from_be_bytes([reply[offset + 4], reply[offset + 5]]);
    let reply_seq = u16::from_be_bytes([reply[offset + 6], reply[offset + 7]]);
    // DGRAM sockets rewrite the identifier; match on sequence alone there
    // is unreliable, so accept either the exact id or the kernel rewrite.
    reply[offset] == expected_type && reply_seq == sequence && (reply_id == identifier || offset == 0)
}

fn build_echo_request(ip: IpAddr, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = match ip {
        IpAddr::V4(_) => ICMPV4_ECHO_REQUEST,
        IpAddr::V6(_) => ICMPV6_ECHO_REQUEST,
    };
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    // v4 checksum is ours to compute; the kernel fills it in for v6.
    if ip.is_ipv4() {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// RFC 1071 ones-complement checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&odd) = chunks.remainder().first() {
        sum += (odd as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !sum as u16
}
