//! Blocking control client for automation tooling and tests. One command
//! per connection: connect, send the line, collect the reply until the
//! server closes or the read timeout fires.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ControlClient {
    addr: SocketAddr,
    read_timeout: Duration,
}

impl ControlClient {
    pub fn new(port: u16) -> ControlClient {
        ControlClient::with_read_timeout(port, DEFAULT_READ_TIMEOUT)
    }

    /// A longer timeout lets a caller sit out queueing delays, e.g. while
    /// the server's workers are saturated.
    pub fn with_read_timeout(port: u16, read_timeout: Duration) -> ControlClient {
        ControlClient {
            addr: SocketAddr::from(([127, 0, 0, 1], port)),
            read_timeout,
        }
    }

    /// Sends one command line and returns the trimmed response. Shutting
    /// down the write half after the command tells the server this session
    /// is done, so the response ends with EOF rather than a timeout wait.
    pub fn send(&self, command: &str) -> std::io::Result<String> {
        let mut stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;

        let mut response = String::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => response.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(response.trim_end().to_string())
    }

    /// Liveness probe: true when the server answers `ping`.
    pub fn ping(&self) -> bool {
        self.send("ping").map(|reply| reply == "pong").unwrap_or(false)
    }
}
