//! Passive-port allocation: a randomized probe over `[min, max]` with an
//! in-use bitmap, guarded by a mutex and shared by every session.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Mutex;
use tokio::net::TcpListener;

const MAX_PROBES: u32 = 32;

pub struct PassivePorts {
    range: RangeInclusive<u16>,
    in_use: Mutex<HashSet<u16>>,
}

impl PassivePorts {
    pub fn new(min: u16, max: u16) -> Self {
        PassivePorts {
            range: min..=max,
            in_use: Mutex::new(HashSet::new()),
        }
    }

    fn random_port(&self) -> u16 {
        let span = (*self.range.end() as u32) - (*self.range.start() as u32) + 1;
        let mut bytes = [0u8; 4];
        // A failure here (exhausted entropy source) is not expected in
        // practice; fall back to the bottom of the range rather than panic.
        let offset = if getrandom::fill(&mut bytes).is_ok() {
            u32::from_le_bytes(bytes) % span
        } else {
            0
        };
        (*self.range.start() as u32 + offset) as u16
    }

    /// Binds a fresh passive listener on a randomly probed free port,
    /// retrying on `EADDRINUSE` up to a bounded number of attempts.
    pub async fn bind(&self, host: std::net::IpAddr) -> std::io::Result<(TcpListener, u16)> {
        for _ in 0..MAX_PROBES {
            let port = {
                let mut guard = self.in_use.lock().unwrap();
                let candidate = self.random_port();
                if guard.contains(&candidate) {
                    continue;
                }
                guard.insert(candidate);
                candidate
            };
            match TcpListener::bind((host, port)).await {
                Ok(listener) => return Ok((listener, port)),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    self.release(port);
                    continue;
                }
                Err(e) => {
                    self.release(port);
                    return Err(e);
                }
            }
        }
        Err(std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free passive port found after probing"))
    }

    /// Releases a previously bound port back to the free set. Deferred to
    /// the data connection's close.
    pub fn release(&self, port: u16) {
        self.in_use.lock().unwrap().remove(&port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_picks_a_port_within_range() {
        let pool = PassivePorts::new(40000, 40010);
        let (_listener, port) = pool.bind("127.0.0.1".parse().unwrap()).await.unwrap();
        assert!((40000..=40010).contains(&port));
        pool.release(port);
    }

    #[tokio::test]
    async fn released_port_can_be_reused() {
        let pool = PassivePorts::new(40020, 40020);
        let (_listener, port) = pool.bind("127.0.0.1".parse().unwrap()).await.unwrap();
        pool.release(port);
        drop(_listener);
        let (_listener2, port2) = pool.bind("127.0.0.1".parse().unwrap()).await.unwrap();
        assert_eq!(port, port2);
    }
}
