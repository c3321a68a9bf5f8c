use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, info};
use tokio::{
    net::UdpSocket,
    time::{timeout_at, Instant},
};

use crate::{config::Config, message::Reading};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set up discovery socket on {1}: {0}")]
    Socket(std::io::Error, IpAddr),
    #[error("failed to send discovery request to {1}: {0}")]
    Send(std::io::Error, SocketAddr),
    #[error("failed to receive discovery response: {0}")]
    Receive(std::io::Error),
    #[error("malformed response from {1}: {0}")]
    Malformed(serde_json::Error, SocketAddr),
}

/// Something that yields a batch of readings per call.
#[async_trait]
pub(crate) trait Source: Send + Sync {
    async fn poll(&self) -> Result<Vec<Reading>, Error>;
}

/// Find the address the OS would use for outbound traffic.
///
/// Connecting a UDP socket only selects a route, nothing is transmitted. The
/// target is numeric, so no name lookup can block the caller.
pub(crate) fn local_ip(route: SocketAddr) -> IpAddr {
    let detect = || -> std::io::Result<IpAddr> {
        let socket = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(route)?;
        Ok(socket.local_addr()?.ip())
    };
    match detect() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) | Err(_) => {
            debug!("no route through {}, falling back to loopback", route);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Broadcast poller for sensors answering the `GET DATA` protocol.
#[derive(Debug, Clone)]
pub(crate) struct Poller {
    bind_ip: Option<IpAddr>,
    probe_address: SocketAddr,
    target: SocketAddr,
    request: Vec<u8>,
    window: Duration,
    max_datagram: usize,
}

impl Poller {
    pub fn new(config: &Config) -> Self {
        Self {
            bind_ip: config.bind_ip,
            probe_address: config.probe_address,
            target: config.broadcast_address,
            request: config.request.as_bytes().to_vec(),
            window: config.response_timeout,
            max_datagram: config.max_datagram,
        }
    }

    async fn open(&self) -> Result<UdpSocket, Error> {
        let ip = self
            .bind_ip
            .unwrap_or_else(|| local_ip(self.probe_address));
        let socket = UdpSocket::bind((ip, 0))
            .await
            .map_err(|e| Error::Socket(e, ip))?;
        socket.set_broadcast(true).map_err(|e| Error::Socket(e, ip))?;
        Ok(socket)
    }
}

#[async_trait]
impl Source for Poller {
    async fn poll(&self) -> Result<Vec<Reading>, Error> {
        let socket = self.open().await?;
        socket
            .send_to(&self.request, self.target)
            .await
            .map_err(|e| Error::Send(e, self.target))?;
        debug!("discovery request sent to {}", self.target);

        let deadline = Instant::now() + self.window;
        let mut buffer = vec![0u8; self.max_datagram];
        let mut readings = Vec::new();
        loop {
            let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buffer)).await {
                Ok(received) => received.map_err(Error::Receive)?,
                Err(_) => break,
            };
            debug!("received from {}: {:?}", from, String::from_utf8_lossy(&buffer[..len]));
            let reading: Reading =
                serde_json::from_slice(&buffer[..len]).map_err(|e| Error::Malformed(e, from))?;
            readings.push(reading);
        }

        info!("{} device(s) responded", readings.len());
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn device(replies: Vec<&'static str>) -> (SocketAddr, tokio::task::JoinHandle<Vec<u8>>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut buffer = [0u8; 64];
            let (len, from) = socket.recv_from(&mut buffer).await.unwrap();
            for reply in replies {
                socket.send_to(reply.as_bytes(), from).await.unwrap();
            }
            buffer[..len].to_vec()
        });
        (address, handle)
    }

    fn poller(target: SocketAddr) -> Poller {
        let config = Config {
            bind_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            broadcast_address: target,
            response_timeout: Duration::from_millis(300),
            ..Config::default()
        };
        Poller::new(&config)
    }

    #[tokio::test]
    async fn collects_every_response() {
        let (address, handle) = device(vec![
            r#"{"device": "a", "temperature": 21.5, "humidity": 40, "pressure": 101000, "altitude": 10}"#,
            r#"{"device": "b", "temperature": 19.0, "humidity": 55.5, "pressure": 100900, "altitude": 12}"#,
        ])
        .await;
        let readings = poller(address).poll().await.unwrap();
        assert_eq!(handle.await.unwrap(), b"GET DATA");
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].device, "a");
        assert_eq!(readings[1].humidity, 55.5);
    }

    #[tokio::test]
    async fn silence_yields_empty_batch() {
        let (address, handle) = device(vec![]).await;
        let started = std::time::Instant::now();
        let readings = poller(address).poll().await.unwrap();
        assert!(readings.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_response_fails_poll() {
        let (address, _handle) = device(vec![
            r#"{"device": "a", "temperature": 21.5, "humidity": 40, "pressure": 101000, "altitude": 10}"#,
            "not json",
        ])
        .await;
        let result = poller(address).poll().await;
        assert!(matches!(result, Err(Error::Malformed(_, _))));
    }

    #[test]
    fn local_ip_falls_back_to_loopback() {
        // the detection socket is IPv4 only, so an IPv6 target never connects
        assert_eq!(
            local_ip(SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], 9))),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
        assert_eq!(
            local_ip(SocketAddr::from(([127, 0, 0, 1], 9))),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
