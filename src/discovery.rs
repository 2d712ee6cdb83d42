//! SSDP discovery of receivers on the local network.
//!
//! A scan sends one M-SEARCH to the multicast group, keeps every response
//! that carries the receiver family signature, and fetches the device
//! description each response points to. Scans are one-shot: the socket is
//! closed when the response window ends.

use crate::error::{AvrError, Result};
use crate::types::DiscoveredDevice;
use futures_util::stream::{FuturesUnordered, StreamExt};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};

/// Standard SSDP multicast group
pub const MULTICAST_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

/// Site-local IPv6 SSDP group
pub const MULTICAST6_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0xc)), 1900);

/// Token that marks a response as coming from a supported receiver
pub const DEVICE_SIGNATURE: &str = "denon-heos";

/// Configuration for a discovery scan
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Where the M-SEARCH is sent
    pub target: SocketAddr,
    /// How long responses are collected
    pub timeout: Duration,
    /// Multicast TTL (hop limit on IPv6)
    pub ttl: u32,
    /// Responses not containing this token (any case) are ignored
    pub signature: String,
    /// Deadline for each description fetch
    pub fetch_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: MULTICAST_ADDR,
            timeout: Duration::from_secs(5),
            ttl: 1,
            signature: DEVICE_SIGNATURE.to_string(),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

impl ScanConfig {
    /// Scan the IPv6 site-local group instead
    pub fn ipv6() -> Self {
        Self {
            target: MULTICAST6_ADDR,
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }
}

/// Checks if `haystack` contains `needle`, ignoring ASCII case
fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn build_msearch_message(target: SocketAddr) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST:{}\r\n\
         ST:upnp:rootdevice\r\n\
         MX:2\r\n\
         MAN:\"ssdp:discover\"\r\n\r\n",
        target
    )
}

/// Description URL of a response from a supported receiver
fn parse_response(response: &str, signature: &str) -> Option<String> {
    if !contains_ignore_ascii_case(response, signature) {
        return None;
    }
    // Split at the first colon only, the URL has its own
    response
        .lines()
        .find(|l| starts_with_ignore_ascii_case(l, "location:"))
        .and_then(|l| l.find(':').map(|idx| l[idx + 1..].trim().to_string()))
        .filter(|url| !url.is_empty())
}

fn create_socket(config: &ScanConfig) -> Result<UdpSocket> {
    let (domain, bind_addr) = match config.target {
        SocketAddr::V4(_) => (Domain::IPV4, SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)),
        SocketAddr::V6(_) => (Domain::IPV6, SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // Stay on the local segment
    let ttl = match config.target {
        SocketAddr::V4(_) => socket.set_multicast_ttl_v4(config.ttl),
        SocketAddr::V6(_) => socket.set_multicast_hops_v6(config.ttl),
    };
    if let Err(e) = ttl {
        tracing::warn!("Failed to set multicast TTL: {}", e);
    }

    socket.set_nonblocking(true)?;
    socket.bind(&bind_addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Index of a description field in `DESCRIPTION_FIELDS`
fn field_index(name: &[u8]) -> Option<usize> {
    DESCRIPTION_FIELDS
        .iter()
        .position(|field| field.as_bytes() == name)
}

const DESCRIPTION_FIELDS: [&str; 4] = ["manufacturer", "modelName", "serialNumber", "friendlyName"];

/// Pull the identity fields out of a UPnP device description.
///
/// Only the first `device` element is looked at, and within it the first
/// occurrence of each field wins.
pub(crate) fn parse_description(xml: &str, ip: &str) -> Result<DiscoveredDevice> {
    let mut reader = Reader::from_str(xml);
    let mut fields: [Option<String>; 4] = Default::default();
    let mut depth = 0usize;
    let mut seen_device = false;
    let mut current: Option<usize> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth > 0 {
                    depth += 1;
                    current = field_index(e.local_name().as_ref()).filter(|i| fields[*i].is_none());
                    text.clear();
                } else if !seen_device && e.local_name().as_ref() == b"device" {
                    seen_device = true;
                    depth = 1;
                }
            }
            Event::Empty(e) if depth > 0 => {
                if let Some(i) = field_index(e.local_name().as_ref()) {
                    fields[i].get_or_insert_with(String::new);
                }
            }
            Event::Text(e) if current.is_some() => {
                if let Ok(t) = e.unescape() {
                    text.push_str(&t);
                }
            }
            Event::CData(e) if current.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Event::End(_) if depth > 0 => {
                if let Some(i) = current.take() {
                    fields[i] = Some(text.trim().to_string());
                }
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_device {
        return Err(AvrError::MissingField("device"));
    }
    let [brand, model, serial, name] = fields;
    Ok(DiscoveredDevice {
        ip: ip.to_string(),
        brand: brand.ok_or(AvrError::MissingField("manufacturer"))?,
        model: model.ok_or(AvrError::MissingField("modelName"))?,
        serial: serial.ok_or(AvrError::MissingField("serialNumber"))?,
        name: name.ok_or(AvrError::MissingField("friendlyName"))?,
    })
}

async fn fetch_description(client: &reqwest::Client, ip: &str, url: &str) -> Result<DiscoveredDevice> {
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_description(&body, ip)
}

/// Run one bounded discovery scan
///
/// `callback` is called once per receiver whose description could be
/// fetched. Responders whose description fails are logged and skipped.
///
/// # Example
///
/// ```no_run
/// use madeavr::{scan, ScanConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     scan(&ScanConfig::default(), |device| {
///         println!("Found {} ({}) at {}", device.name, device.model, device.ip);
///     })
///     .await?;
///     Ok(())
/// }
/// ```
pub async fn scan<F>(config: &ScanConfig, mut callback: F) -> Result<()>
where
    F: FnMut(DiscoveredDevice),
{
    let socket = create_socket(config)?;
    let client = reqwest::Client::builder()
        .timeout(config.fetch_timeout)
        .no_proxy()
        .build()?;

    let msg = build_msearch_message(config.target);
    socket.send_to(msg.as_bytes(), config.target).await?;
    tracing::info!("Sent discovery request to {}", config.target);

    let deadline = Instant::now() + config.timeout;
    let mut seen = HashSet::new();
    let mut fetches = FuturesUnordered::new();
    let mut buf = [0u8; 2048];

    let mut report = |ip: String, url: String, result: Result<DiscoveredDevice>| match result {
        Ok(device) => {
            tracing::debug!("Got device: {:?}", device);
            callback(device);
        }
        Err(e) => {
            tracing::warn!("Dropping {} ({}): {}", ip, url, e);
        }
    };

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    let response = String::from_utf8_lossy(&buf[..len]);
                    let Some(url) = parse_response(&response, &config.signature) else {
                        continue;
                    };
                    if seen.insert(url.clone()) {
                        let ip = src.ip().to_string();
                        tracing::debug!("Candidate at {}: {}", ip, url);
                        let client = &client;
                        fetches.push(async move {
                            let result = fetch_description(client, &ip, &url).await;
                            (ip, url, result)
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!("Discovery socket error: {}", e);
                }
            },
            Some((ip, url, result)) = fetches.next(), if !fetches.is_empty() => {
                report(ip, url, result);
            }
        }
    }

    drop(socket);
    tracing::debug!("Discovery window closed, {} fetch(es) pending", fetches.len());

    while let Some((ip, url, result)) = fetches.next().await {
        report(ip, url, result);
    }

    Ok(())
}

/// Run one scan and collect the receivers found
pub async fn scan_devices(config: &ScanConfig) -> Result<Vec<DiscoveredDevice>> {
    let mut devices = Vec::new();
    scan(config, |device| devices.push(device)).await?;
    Ok(devices)
}
