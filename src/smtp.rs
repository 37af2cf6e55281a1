//! Mail submission (SMTP) service.
use std::{
    io,
    net::{SocketAddr, TcpStream},
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use crate::{
    config::{SmtpConfig, parse_duration},
    error::{ConfigError, ServiceError},
    server::{ConnectionHandler, LineProtocol, Reply, TcpServer, serve_lines},
    service::{Drain, Service},
};

struct SmtpSession {
    domain: String,
    protocol: LineProtocol,
}

impl SmtpSession {
    fn respond(&self, line: &str) -> Reply {
        let verb = line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match verb.as_str() {
            "HELO" | "EHLO" => Reply::Line(format!("250 {} Hello", self.domain)),
            "NOOP" | "RSET" => Reply::Line("250 OK".into()),
            "QUIT" => Reply::Close(format!("221 {} Closing connection", self.domain)),
            "" => Reply::Line("500 Empty command".into()),
            _ => Reply::Line("502 Command not implemented".into()),
        }
    }
}

impl ConnectionHandler for SmtpSession {
    fn handle(&self, stream: TcpStream, stopping: &AtomicBool) -> io::Result<()> {
        serve_lines(stream, stopping, &self.protocol, |line| self.respond(line))
    }
}

/// SMTP listener. `start` blocks until the service is stopped.
pub struct SmtpServer {
    server: Arc<TcpServer>,
}

impl SmtpServer {
    pub fn new(config: &SmtpConfig) -> Result<Self, ConfigError> {
        let session = SmtpSession {
            domain: config.domain.clone(),
            protocol: LineProtocol {
                greeting: format!("220 {} mailhub SMTP ready", config.domain),
                shutdown: format!("421 {} Service shutting down", config.domain),
                idle_timeout: parse_duration(&config.timeout)?,
            },
        };
        Ok(Self {
            server: Arc::new(TcpServer::new("smtp", config.address, Arc::new(session))),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }
}

impl Service for SmtpServer {
    fn start(&self) -> Result<(), ServiceError> {
        self.server.bind()?;
        self.server.serve();
        Ok(())
    }

    fn stop(&self) {
        self.server.stop();
    }
}

impl Drain for SmtpServer {
    fn drain(&self, timeout: Option<Duration>) {
        self.server.drain(timeout);
    }
}
