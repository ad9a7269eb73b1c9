//! SNTP (RFC 4330) client time source.

use crate::source::{SourceError, TimeSource};
use async_trait::async_trait;
use notary_core::Timestamp;
use tokio::net::UdpSocket;
use tracing::debug;

/// Seconds between 1900-01-01 (NTP epoch) and 1970-01-01 (Unix epoch)
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

const PACKET_LEN: usize = 48;

/// LI = 0, VN = 4, Mode = 3 (client)
const CLIENT_HEADER: u8 = 0b00_100_011;

const MODE_SERVER: u8 = 4;

/// Public servers queried when no list is configured
pub const DEFAULT_SERVERS: [&str; 5] = [
    "time.google.com",
    "time.cloudflare.com",
    "time.nist.gov",
    "time.apple.com",
    "pool.ntp.org",
];

/// Queries one NTP server over UDP
#[derive(Debug, Clone)]
pub struct SntpSource {
    host: String,
    port: u16,
}

impl SntpSource {
    /// Standard NTP port
    pub const DEFAULT_PORT: u16 = 123;

    /// Create a source for `host`, accepting `host:port` as well
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => match port.parse() {
                Ok(port) => Self {
                    host: name.to_string(),
                    port,
                },
                Err(_) => Self {
                    host,
                    port: Self::DEFAULT_PORT,
                },
            },
            _ => Self {
                host,
                port: Self::DEFAULT_PORT,
            },
        }
    }

    /// One source per default public server
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        DEFAULT_SERVERS.iter().map(|host| Self::new(*host)).collect()
    }

    /// Target port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl TimeSource for SntpSource {
    fn id(&self) -> &str {
        &self.host
    }

    async fn query(&self) -> Result<Timestamp, SourceError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;
        socket
            .connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;

        let request = build_request(Timestamp::now());
        socket
            .send(&request)
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;

        let mut response = [0u8; PACKET_LEN];
        let n = socket
            .recv(&mut response)
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;

        let instant = parse_response(&request, &response[..n])?;
        debug!(server = %self.host, instant = %instant, "sntp response");
        Ok(instant)
    }
}

/// Client request carrying `now` as its transmit timestamp
pub(crate) fn build_request(now: Timestamp) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_HEADER;
    packet[40..48].copy_from_slice(&to_ntp(now));
    packet
}

/// Validate a server reply and extract its transmit timestamp
pub(crate) fn parse_response(request: &[u8; PACKET_LEN], response: &[u8]) -> Result<Timestamp, SourceError> {
    if response.len() < PACKET_LEN {
        return Err(SourceError::InvalidResponse(format!(
            "short packet: {} bytes",
            response.len()
        )));
    }

    let mode = response[0] & 0b111;
    if mode != MODE_SERVER {
        return Err(SourceError::InvalidResponse(format!("unexpected mode {mode}")));
    }

    let stratum = response[1];
    if stratum == 0 {
        let code = String::from_utf8_lossy(&response[12..16]).into_owned();
        return Err(SourceError::KissOfDeath(code));
    }

    // The server echoes our transmit timestamp as its originate timestamp
    if response[24..32] != request[40..48] {
        return Err(SourceError::InvalidResponse("originate timestamp mismatch".to_string()));
    }

    let transmit: [u8; 8] = response[40..48]
        .try_into()
        .map_err(|_| SourceError::InvalidResponse("truncated transmit timestamp".to_string()))?;
    if transmit == [0u8; 8] {
        return Err(SourceError::InvalidResponse("zero transmit timestamp".to_string()));
    }

    Ok(from_ntp(transmit))
}

fn to_ntp(ts: Timestamp) -> [u8; 8] {
    // Truncation to 32 bits wraps into the current NTP era
    let seconds = ts.seconds().wrapping_add(NTP_UNIX_OFFSET) as u32;
    let fraction = ((u64::from(ts.subsec_nanos()) << 32) / u64::from(Timestamp::NANOS_PER_SEC)) as u32;
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&seconds.to_be_bytes());
    out[4..].copy_from_slice(&fraction.to_be_bytes());
    out
}

fn from_ntp(raw: [u8; 8]) -> Timestamp {
    let seconds = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let fraction = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);

    // Era 1 starts in 2036; values with the top bit clear belong to it
    let mut ntp_seconds = i64::from(seconds);
    if seconds & 0x8000_0000 == 0 {
        ntp_seconds += 1 << 32;
    }

    let nanos = ((u64::from(fraction) * u64::from(Timestamp::NANOS_PER_SEC)) >> 32) as u32;
    Timestamp::new(ntp_seconds - NTP_UNIX_OFFSET, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_reply(request: &[u8; PACKET_LEN], transmit: Timestamp) -> [u8; PACKET_LEN] {
        let mut reply = [0u8; PACKET_LEN];
        reply[0] = 0b00_100_100;
        reply[1] = 2;
        reply[24..32].copy_from_slice(&request[40..48]);
        reply[40..48].copy_from_slice(&to_ntp(transmit));
        reply
    }

    #[test]
    fn test_new_parses_port() {
        let source = SntpSource::new("localhost:1123");
        assert_eq!(source.id(), "localhost");
        assert_eq!(source.port(), 1123);

        let source = SntpSource::new("time.google.com");
        assert_eq!(source.port(), SntpSource::DEFAULT_PORT);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(SntpSource::defaults().len(), 5);
    }

    #[test]
    fn test_ntp_conversion_roundtrip() {
        let ts = Timestamp::new(1_700_000_000, 250_000_000);
        let back = from_ntp(to_ntp(ts));
        assert_eq!(back.seconds(), ts.seconds());
        // 32-bit fraction resolution is ~233ps
        assert!(back.subsec_nanos().abs_diff(ts.subsec_nanos()) <= 1);
    }

    #[test]
    fn test_ntp_era_one() {
        // 2040-01-01T00:00:00Z
        let ts = Timestamp::new(2_208_988_800, 0);
        assert_eq!(from_ntp(to_ntp(ts)).seconds(), ts.seconds());
    }

    #[test]
    fn test_parse_valid_response() {
        let request = build_request(Timestamp::new(1_700_000_000, 0));
        let transmit = Timestamp::new(1_700_000_001, 500_000_000);
        let reply = server_reply(&request, transmit);
        let parsed = parse_response(&request, &reply).unwrap();
        assert_eq!(parsed.seconds(), transmit.seconds());
    }

    #[test]
    fn test_parse_rejects_short_packet() {
        let request = build_request(Timestamp::now());
        let result = parse_response(&request, &[0u8; 12]);
        assert!(matches!(result, Err(SourceError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_rejects_kiss_of_death() {
        let request = build_request(Timestamp::now());
        let mut reply = server_reply(&request, Timestamp::now());
        reply[1] = 0;
        reply[12..16].copy_from_slice(b"RATE");
        assert_eq!(
            parse_response(&request, &reply),
            Err(SourceError::KissOfDeath("RATE".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_spoofed_originate() {
        let request = build_request(Timestamp::new(1_700_000_000, 0));
        let mut reply = server_reply(&request, Timestamp::now());
        reply[31] ^= 0xFF;
        assert!(matches!(
            parse_response(&request, &reply),
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_rejects_client_mode() {
        let request = build_request(Timestamp::now());
        let mut reply = server_reply(&request, Timestamp::now());
        reply[0] = CLIENT_HEADER;
        assert!(parse_response(&request, &reply).is_err());
    }
}
