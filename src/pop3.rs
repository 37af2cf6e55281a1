//! Mailbox retrieval (POP3) service.
use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use crate::{
    config::{Pop3Config, parse_duration},
    error::{ConfigError, ServiceError},
    server::{ConnectionHandler, LineProtocol, Reply, TcpServer, serve_lines},
    service::{Drain, Service},
};

struct Pop3Session {
    protocol: LineProtocol,
}

impl Pop3Session {
    fn respond(line: &str) -> Reply {
        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match verb.as_str() {
            "NOOP" => Reply::Line("+OK".into()),
            "QUIT" => Reply::Close("+OK Goodbye".into()),
            _ => Reply::Line("-ERR Command not implemented".into()),
        }
    }
}

impl ConnectionHandler for Pop3Session {
    fn handle(&self, stream: TcpStream, stopping: &AtomicBool) -> io::Result<()> {
        serve_lines(stream, stopping, &self.protocol, Self::respond)
    }
}

/// POP3 listener. `start` returns once the listener is bound.
pub struct Pop3Server {
    server: Arc<TcpServer>,
}

impl Pop3Server {
    pub fn new(config: &Pop3Config) -> Result<Self, ConfigError> {
        let session = Pop3Session {
            protocol: LineProtocol {
                greeting: format!("+OK {} mailhub POP3 ready", config.domain),
                shutdown: "-ERR Server shutting down".into(),
                idle_timeout: parse_duration(&config.timeout)?,
            },
        };
        Ok(Self {
            server: Arc::new(TcpServer::new("pop3", config.address, Arc::new(session))),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }
}

impl Service for Pop3Server {
    fn start(&self) -> Result<(), ServiceError> {
        self.server.spawn()?;
        Ok(())
    }

    fn stop(&self) {
        self.server.stop();
    }
}

impl Drain for Pop3Server {
    fn drain(&self, timeout: Option<Duration>) {
        self.server.drain(timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};

    #[test]
    fn greets_and_quits() {
        let config = Pop3Config {
            address: SocketAddr::from(([127, 0, 0, 1], 0)),
            domain: "pop.test".into(),
            timeout: "5s".into(),
        };
        let pop3 = Pop3Server::new(&config).unwrap();
        pop3.start().unwrap();
        let addr = pop3.local_addr().unwrap();

        let stream = TcpStream::connect(addr).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "+OK pop.test mailhub POP3 ready\r\n");

        writer.write_all(b"STAT\r\n").unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("-ERR"));

        writer.write_all(b"quit\r\n").unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "+OK Goodbye\r\n");

        pop3.drain(Some(Duration::from_secs(5)));
    }
}
