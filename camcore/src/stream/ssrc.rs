use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info};

/// Pause after releasing the sniffer socket so the OS frees the port before
/// the SFU rebinds it.
pub const PORT_QUIESCENCE: Duration = Duration::from_millis(100);

const RTP_HEADER_LEN: usize = 12;
const RTP_VERSION: u8 = 2;

#[derive(Debug)]
pub enum SsrcError {
    Timeout,
    Io(std::io::Error),
}

impl std::fmt::Display for SsrcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SsrcError::Timeout => write!(f, "no rtp datagram arrived before the deadline"),
            SsrcError::Io(e) => write!(f, "ssrc capture socket: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SsrcCapture {
    pub ssrc: u32,
    /// Address the transcoder sends from; the plain transport connects back to it.
    pub source_addr: SocketAddr,
}

/// Pull the SSRC out of an RTP datagram, or None if it does not look like RTP.
///
/// A zero SSRC is rejected: the producer guard requires non-zero.
pub fn parse_rtp_ssrc(datagram: &[u8]) -> Option<u32> {
    if datagram.len() < RTP_HEADER_LEN {
        return None;
    }
    if datagram[0] >> 6 != RTP_VERSION {
        return None;
    }
    let ssrc = u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]);
    if ssrc == 0 {
        return None;
    }
    Some(ssrc)
}

/// Sniff the first RTP packet on `host:port` and return its SSRC.
///
/// The socket is bound only for the sniff; callers must wait PORT_QUIESCENCE
/// before asking the SFU to bind the same port.
pub async fn capture(host: &str, port: u16, timeout: Duration) -> Result<SsrcCapture, SsrcError> {
    let socket = UdpSocket::bind((host, port)).await.map_err(SsrcError::Io)?;
    debug!("sniffing {}:{} for the first rtp packet", host, port);

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1500];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SsrcError::Timeout);
        }
        let (len, source_addr) =
            match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
                Ok(Ok(received)) => received,
                Ok(Err(e)) => return Err(SsrcError::Io(e)),
                Err(_) => return Err(SsrcError::Timeout),
            };

        match parse_rtp_ssrc(&buf[..len]) {
            Some(ssrc) => {
                info!(
                    "captured ssrc {:#010x} from {} on port {}",
                    ssrc, source_addr, port
                );
                drop(socket);
                tokio::time::sleep(PORT_QUIESCENCE).await;
                return Ok(SsrcCapture { ssrc, source_addr });
            }
            None => {
                debug!("discarding non-rtp datagram ({} bytes) from {}", len, source_addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(ssrc: u32) -> Vec<u8> {
        let mut pkt = vec![0x80, 96, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 0];
        pkt[8..12].copy_from_slice(&ssrc.to_be_bytes());
        pkt.push(0xAA);
        pkt
    }

    #[test]
    fn parses_ssrc_big_endian() {
        assert_eq!(parse_rtp_ssrc(&rtp_packet(0xdeadbeef)), Some(0xdeadbeef));
        assert_eq!(parse_rtp_ssrc(&rtp_packet(1)), Some(1));
    }

    #[test]
    fn rejects_short_datagrams() {
        assert_eq!(parse_rtp_ssrc(&[0x80; 11]), None);
        assert_eq!(parse_rtp_ssrc(&[]), None);
    }

    #[test]
    fn rejects_wrong_version_bits() {
        let mut pkt = rtp_packet(42);
        pkt[0] = 0x00; // version 0
        assert_eq!(parse_rtp_ssrc(&pkt), None);
        pkt[0] = 0x40; // version 1
        assert_eq!(parse_rtp_ssrc(&pkt), None);
    }

    #[test]
    fn rejects_zero_ssrc() {
        assert_eq!(parse_rtp_ssrc(&rtp_packet(0)), None);
    }

    #[tokio::test]
    async fn captures_first_valid_packet() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let send_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Garbage first, then real RTP; the capturer must skip the former.
            let _ = sender.send_to(b"junk", ("127.0.0.1", port)).await;
            let _ = sender
                .send_to(&rtp_packet(0xcafef00d), ("127.0.0.1", port))
                .await;
        });

        let capture = capture("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(capture.ssrc, 0xcafef00d);
        send_task.await.unwrap();
    }

    #[tokio::test]
    async fn times_out_without_traffic() {
        let port = portpicker::pick_unused_port().expect("no free port");
        let result = capture("127.0.0.1", port, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(SsrcError::Timeout)));
    }
}
