//! Byte transports under the MAVLink link. Every read side has a timeout so
//! the reader thread can notice a stop request on a quiet link.

use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};

pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial { dev: String, baud: u32 },
    /// Listen here; reply to whoever sent the last datagram.
    UdpIn(SocketAddr),
    UdpOut(SocketAddr),
    TcpOut(SocketAddr),
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("serial:") {
            let (dev, baud) = rest.rsplit_once(':').context("serial endpoint needs <dev>:<baud>")?;
            anyhow::ensure!(!dev.is_empty(), "serial endpoint without device: {}", url);
            let baud = baud.parse().with_context(|| format!("bad baud rate in {}", url))?;
            return Ok(Endpoint::Serial { dev: dev.to_string(), baud });
        }
        let (scheme, addr) = url.split_once(':').with_context(|| format!("not a mavlink URL: {}", url))?;
        let resolve = || -> Result<SocketAddr> {
            addr.to_socket_addrs()
                .with_context(|| format!("resolve {}", addr))?
                .next()
                .with_context(|| format!("no address for {}", addr))
        };
        match scheme {
            "udpin" => Ok(Endpoint::UdpIn(resolve()?)),
            "udpout" => Ok(Endpoint::UdpOut(resolve()?)),
            "tcpout" => Ok(Endpoint::TcpOut(resolve()?)),
            other => anyhow::bail!("unsupported mavlink scheme {:?}", other),
        }
    }
}

/// Receive half, owned by the reader thread.
pub enum Rx {
    Datagram { socket: UdpSocket, peer: Arc<Mutex<Option<SocketAddr>>>, learn_peer: bool },
    Stream(BufReader<Box<dyn Read + Send>>),
}

/// Send half, owned by the link.
pub enum Tx {
    Datagram { socket: UdpSocket, peer: Arc<Mutex<Option<SocketAddr>>> },
    Stream(Box<dyn Write + Send>),
}

impl Tx {
    /// Send one encoded frame. Datagram links drop frames until a peer is known.
    pub fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        match self {
            Tx::Datagram { socket, peer } => {
                let dest = *peer.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(dest) = dest {
                    socket.send_to(frame, dest)?;
                }
                Ok(())
            }
            Tx::Stream(w) => {
                w.write_all(frame)?;
                w.flush()
            }
        }
    }
}

pub fn open(endpoint: &Endpoint) -> Result<(Rx, Tx)> {
    match endpoint {
        Endpoint::Serial { dev, baud } => {
            let port = tokio_serial::new(dev.as_str(), *baud)
                .timeout(READ_TIMEOUT)
                .open()
                .with_context(|| format!("open fc serial device {}", dev))?;
            let writer = port.try_clone().context("clone serial port")?;
            Ok((Rx::Stream(BufReader::new(Box::new(port))), Tx::Stream(Box::new(writer))))
        }
        Endpoint::UdpIn(addr) => udp(UdpSocket::bind(addr).with_context(|| format!("bind {}", addr))?, None),
        Endpoint::UdpOut(addr) => udp(UdpSocket::bind("0.0.0.0:0").context("bind udp")?, Some(*addr)),
        Endpoint::TcpOut(addr) => {
            let stream = TcpStream::connect(addr).with_context(|| format!("connect {}", addr))?;
            stream.set_read_timeout(Some(READ_TIMEOUT))?;
            let writer = stream.try_clone().context("clone tcp stream")?;
            Ok((Rx::Stream(BufReader::new(Box::new(stream))), Tx::Stream(Box::new(writer))))
        }
    }
}

fn udp(socket: UdpSocket, dest: Option<SocketAddr>) -> Result<(Rx, Tx)> {
    socket.set_read_timeout(Some(READ_TIMEOUT))?;
    let learn_peer = dest.is_none();
    let peer = Arc::new(Mutex::new(dest));
    let rx = Rx::Datagram { socket: socket.try_clone()?, peer: Arc::clone(&peer), learn_peer };
    Ok((rx, Tx::Datagram { socket, peer }))
}

pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serial_endpoints() {
        assert_eq!(
            Endpoint::parse("serial:/dev/ttyACM0:57600").unwrap(),
            Endpoint::Serial { dev: "/dev/ttyACM0".into(), baud: 57600 }
        );
        assert_eq!(
            Endpoint::parse("serial:COM3:115200").unwrap(),
            Endpoint::Serial { dev: "COM3".into(), baud: 115200 }
        );
        assert!(Endpoint::parse("serial:/dev/ttyUSB0").is_err());
        assert!(Endpoint::parse("serial::57600").is_err());
    }

    #[test]
    fn parses_network_endpoints() {
        let addr: SocketAddr = "127.0.0.1:14550".parse().unwrap();
        assert_eq!(Endpoint::parse("udpin:127.0.0.1:14550").unwrap(), Endpoint::UdpIn(addr));
        assert_eq!(Endpoint::parse("udpout:127.0.0.1:14550").unwrap(), Endpoint::UdpOut(addr));
        assert_eq!(Endpoint::parse("tcpout:127.0.0.1:14550").unwrap(), Endpoint::TcpOut(addr));
        assert!(Endpoint::parse("udpbcast:127.0.0.1:14550").is_err());
        assert!(Endpoint::parse("localhost").is_err());
    }

    #[test]
    fn udpout_sends_to_fixed_peer() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (_rx, mut tx) = open(&Endpoint::UdpOut(peer.local_addr().unwrap())).unwrap();
        tx.send_frame(b"frame").unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"frame");
    }
}
