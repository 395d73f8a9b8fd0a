use std::collections::HashMap;
use std::net::UdpSocket;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::RtpPorts;

#[derive(Debug, PartialEq, Eq)]
pub enum PortError {
    NoPortsAvailable,
}

/// Hands out UDP ingress ports, one per active stream.
///
/// The hash-derived candidate is only a starting point; the ownership map is
/// what actually decides who holds a port.
pub struct PortBroker {
    range: RtpPorts,
    held: Mutex<HashMap<Uuid, u16>>,
}

impl PortBroker {
    pub fn new(range: RtpPorts) -> Self {
        Self {
            range,
            held: Mutex::new(HashMap::new()),
        }
    }

    fn span(&self) -> u32 {
        (self.range.max - self.range.min) as u32 + 1
    }

    fn candidate_for(&self, stream_id: Uuid) -> u16 {
        let offset = (fnv1a64(stream_id.as_bytes()) % self.span() as u64) as u16;
        self.range.min + offset
    }

    fn probe(&self, port: u16) -> bool {
        match UdpSocket::bind((self.range.host.as_str(), port)) {
            Ok(sock) => {
                let _ = sock.set_nonblocking(true);
                true
            }
            Err(_) => false,
        }
    }

    pub async fn reserve(&self, stream_id: Uuid) -> Result<u16, PortError> {
        let mut held = self.held.lock().await;
        if let Some(port) = held.get(&stream_id) {
            return Ok(*port);
        }

        let span = self.span();
        let first = self.candidate_for(stream_id);
        for step in 0..span {
            let offset = (first - self.range.min) as u32 + step;
            let port = self.range.min + (offset % span) as u16;
            if held.values().any(|held_port| *held_port == port) {
                continue;
            }
            if self.probe(port) {
                held.insert(stream_id, port);
                return Ok(port);
            }
        }
        Err(PortError::NoPortsAvailable)
    }

    pub async fn release(&self, stream_id: Uuid) {
        self.held.lock().await.remove(&stream_id);
    }

    pub async fn held_by(&self, stream_id: Uuid) -> Option<u16> {
        self.held.lock().await.get(&stream_id).copied()
    }
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(min: u16, max: u16) -> PortBroker {
        PortBroker::new(RtpPorts {
            min,
            max,
            host: "127.0.0.1".to_string(),
        })
    }

    #[tokio::test]
    async fn reserve_is_deterministic_and_idempotent() {
        let broker = broker(21100, 21199);
        let id = Uuid::new_v4();
        let port = broker.reserve(id).await.unwrap();
        assert!((21100..=21199).contains(&port));
        assert_eq!(broker.reserve(id).await.unwrap(), port);
        assert_eq!(broker.held_by(id).await, Some(port));
    }

    #[tokio::test]
    async fn two_streams_never_share_a_port() {
        let broker = broker(21200, 21207);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..8 {
            let port = broker.reserve(Uuid::new_v4()).await.unwrap();
            assert!(seen.insert(port), "port {} handed out twice", port);
        }
    }

    #[tokio::test]
    async fn exhaustion_reports_no_ports() {
        let broker = broker(21300, 21301);
        broker.reserve(Uuid::new_v4()).await.unwrap();
        broker.reserve(Uuid::new_v4()).await.unwrap();
        assert_eq!(
            broker.reserve(Uuid::new_v4()).await,
            Err(PortError::NoPortsAvailable)
        );
    }

    #[tokio::test]
    async fn released_port_is_reusable() {
        let broker = broker(21400, 21400);
        let a = Uuid::new_v4();
        let port = broker.reserve(a).await.unwrap();
        assert_eq!(port, 21400);
        broker.release(a).await;
        let b = Uuid::new_v4();
        assert_eq!(broker.reserve(b).await.unwrap(), 21400);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let broker = broker(21500, 21501);
        let id = Uuid::new_v4();
        broker.reserve(id).await.unwrap();
        broker.release(id).await;
        broker.release(id).await;
        assert_eq!(broker.held_by(id).await, None);
    }

    #[tokio::test]
    async fn walks_past_externally_bound_port() {
        let broker = broker(21600, 21609);
        let id = Uuid::new_v4();
        let candidate = broker.candidate_for(id);
        let _blocker = UdpSocket::bind(("127.0.0.1", candidate)).unwrap();
        let port = broker.reserve(id).await.unwrap();
        assert_ne!(port, candidate);
    }
}
