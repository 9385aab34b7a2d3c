//! Syslog driver (C8): a UDP or TCP listener parsing RFC3164/RFC5424
//! frames, one record per datagram/line.
//!
//! Priority decodes as `facility*8+severity`; both frame shapes share the
//! same severity-to-level mapping.

use crate::buffer::LogBuffer;
use crate::model::{LogLevel, LogRecord, SyslogFormat, SyslogTransport};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{instrument, warn};

static RFC5424_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<(?P<pri>\d{1,3})>(?P<version>\d)\s+(?P<timestamp>\S+)\s+(?P<host>\S+)\s+(?P<app>\S+)\s+(?P<pid>\S+)\s+(?P<msgid>\S+)\s+(?:\[.*?\]|-)\s*(?P<message>.*)$").unwrap()
});

static RFC3164_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<(?P<pri>\d{1,3})>(?P<timestamp>\w{3}\s+\d{1,2}\s\d{2}:\d{2}:\d{2})\s+(?P<host>\S+)\s+(?P<tag>[^:\[]+)(?:\[(?P<pid>\d+)\])?:\s*(?P<message>.*)$").unwrap()
});

const FACILITY_NAMES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "ntp", "audit", "alert", "clock", "local0", "local1", "local2", "local3", "local4",
    "local5", "local6", "local7",
];

fn severity_to_level(severity: u8) -> LogLevel {
    match severity {
        0 | 1 | 2 => LogLevel::Fatal,
        3 => LogLevel::Error,
        4 => LogLevel::Warn,
        5 | 6 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

/// Parses a single syslog frame; never fails — a frame this can't parse
/// becomes an `UNKNOWN`-level record carrying the raw payload, per the
/// driver's "always ingest" contract.
pub fn parse_syslog_line(line: &str, format: SyslogFormat, source: &str) -> LogRecord {
    let now = chrono::Utc::now().timestamp_millis();
    let re = match format {
        SyslogFormat::Rfc5424 => &*RFC5424_RE,
        SyslogFormat::Rfc3164 => &*RFC3164_RE,
    };
    let Some(caps) = re.captures(line) else {
        return LogRecord::new(now, LogLevel::Unknown, line, source, line);
    };
    let Some(pri) = caps.name("pri").and_then(|m| m.as_str().parse::<u32>().ok()) else {
        return LogRecord::new(now, LogLevel::Unknown, line, source, line);
    };
    let facility = pri / 8;
    let severity = (pri % 8) as u8;
    let level = severity_to_level(severity);
    let message = caps.name("message").map(|m| m.as_str()).unwrap_or(line);

    let mut record = LogRecord::new(now, level, message, source, line);
    record = record.with_metadata(
        "facility",
        FACILITY_NAMES.get(facility as usize).copied().unwrap_or("local0"),
    );
    if let Some(host) = caps.name("host") {
        record = record.with_metadata("host", host.as_str());
    }
    record
}

#[instrument(skip(buffer))]
pub fn spawn_syslog_driver(
    port: u16,
    transport: SyslogTransport,
    format: SyslogFormat,
    source_name: String,
    buffer: Arc<LogBuffer>,
) -> tokio::sync::mpsc::Sender<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        match transport {
            SyslogTransport::Udp => {
                let socket = match UdpSocket::bind(("0.0.0.0", port)).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(port, error = %e, "failed to bind syslog UDP socket");
                        return;
                    }
                };
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    tokio::select! {
                        result = socket.recv(&mut buf) => {
                            match result {
                                Ok(n) => {
                                    let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                                    if !line.is_empty() {
                                        let record = parse_syslog_line(&line, format, &source_name);
                                        buffer.add(record).await;
                                    }
                                }
                                Err(e) => warn!(error = %e, "syslog UDP recv failed"),
                            }
                        }
                        _ = rx.recv() => {
                            warn!(source = %source_name, "syslog driver received stop signal");
                            break;
                        }
                    }
                }
            }
            SyslogTransport::Tcp => {
                let listener = match TcpListener::bind(("0.0.0.0", port)).await {
                    Ok(l) => l,
                    Err(e) => {
                        warn!(port, error = %e, "failed to bind syslog TCP listener");
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        accepted = listener.accept() => {
                            if let Ok((stream, _)) = accepted {
                                let buffer = buffer.clone();
                                let source_name = source_name.clone();
                                tokio::spawn(async move {
                                    handle_tcp_connection(stream, format, source_name, buffer).await;
                                });
                            }
                        }
                        _ = rx.recv() => {
                            warn!(source = %source_name, "syslog driver received stop signal");
                            break;
                        }
                    }
                }
            }
        }
    });
    tx
}

async fn handle_tcp_connection(
    stream: tokio::net::TcpStream,
    format: SyslogFormat,
    source_name: String,
    buffer: Arc<LogBuffer>,
) {
    use tokio::io::AsyncBufReadExt;
    let mut lines = tokio::io::BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    let record = parse_syslog_line(line.trim(), format, &source_name);
                    buffer.add(record).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "syslog TCP read failed");
                break;
            }
        }
    }
}
