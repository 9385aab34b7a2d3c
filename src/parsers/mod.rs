//! Line parsers: pure functions from `(line, sourceHint)` to a [`LogRecord`].
//!
//! Each parser exposes a cheap `recognizes` probe alongside `parse` so a
//! chain can pick the first match without paying for a full parse attempt.
//! Parsers never panic on malformed input; a non-match is `None`, never an
//! error.

use crate::model::{LogLevel, LogRecord};
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

pub trait LogParser: Send + Sync {
    /// Cheap recognition probe used for priority dispatch.
    fn recognizes(&self, line: &str) -> bool;
    /// Parse a recognized line. Returns `None` on any failure; never panics.
    fn parse(&self, line: &str, source: &str) -> Option<LogRecord>;
    fn format_name(&self) -> &'static str;
}

fn status_to_level(status: u16) -> LogLevel {
    match status {
        200..=299 => LogLevel::Info,
        300..=399 => LogLevel::Info,
        400..=499 => LogLevel::Warn,
        500..=599 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn parse_apache_timestamp(raw: &str) -> i64 {
    DateTime::parse_from_str(raw, "%d/%b/%Y:%H:%M:%S %z")
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|_| Utc::now().timestamp_millis())
}

static APACHE_COMBINED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip_address>\S+) \S+ (?P<user_id>\S+) \[(?P<timestamp>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status_code>\d+) (?P<bytes>\S+) "(?P<referer>[^"]*)" "(?P<user_agent>[^"]*)"$"#,
    )
    .expect("static apache combined regex")
});

static APACHE_COMMON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<ip_address>\S+) \S+ (?P<user_id>\S+) \[(?P<timestamp>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+) (?P<protocol>[^"]+)" (?P<status_code>\d+) (?P<bytes>\S+)$"#,
    )
    .expect("static apache common regex")
});

static APACHE_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\[(?P<timestamp>[^\]]+)\] \[(?P<log_level>\w+)\](?: \[client (?P<client_ip>[^\]]+)\])? (?P<error_message>.*)$"#,
    )
    .expect("static apache error regex")
});

static NGINX_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?P<timestamp>\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}) \[(?P<log_level>\w+)\] (?P<process_id>\d+)#\d+: (?:\*\d+ )?(?P<error_message>[^,]*?)(?:, client: (?P<client_ip>[^,]+))?(?:, server: (?P<server>[^,]+))?$"#,
    )
    .expect("static nginx error regex")
});

fn extract_named(caps: &regex::Captures, name: &str) -> Option<String> {
    caps.name(name).map(|m| m.as_str().to_string())
}

/// Apache error log: `[Wed Oct 11 14:32:52 2000] [error] [client 1.2.3.4] message`.
pub struct ApacheErrorParser;

impl LogParser for ApacheErrorParser {
    fn recognizes(&self, line: &str) -> bool {
        APACHE_ERROR_RE.is_match(line)
    }

    fn parse(&self, line: &str, source: &str) -> Option<LogRecord> {
        let caps = APACHE_ERROR_RE.captures(line)?;
        let level = match extract_named(&caps, "log_level").as_deref() {
            Some("error") | Some("crit") | Some("alert") | Some("emerg") => LogLevel::Error,
            Some("warn") => LogLevel::Warn,
            Some("notice") | Some("info") => LogLevel::Info,
            Some("debug") => LogLevel::Debug,
            _ => LogLevel::Error,
        };
        let message = extract_named(&caps, "error_message").unwrap_or_default();
        let mut record = LogRecord::new(Utc::now().timestamp_millis(), level, message, source, line)
            .with_metadata("log_format", "apache_error");
        if let Some(ts) = extract_named(&caps, "timestamp") {
            record = record.with_metadata("timestamp", ts);
        }
        if let Some(client_ip) = extract_named(&caps, "client_ip") {
            record = record.with_metadata("client_ip", client_ip);
        }
        Some(record)
    }

    fn format_name(&self) -> &'static str {
        "apache_error"
    }
}

struct ApacheAccessParser {
    combined: bool,
}

impl LogParser for ApacheAccessParser {
    fn recognizes(&self, line: &str) -> bool {
        if self.combined {
            APACHE_COMBINED_RE.is_match(line)
        } else {
            APACHE_COMMON_RE.is_match(line)
        }
    }

    fn parse(&self, line: &str, source: &str) -> Option<LogRecord> {
        let caps = if self.combined {
            APACHE_COMBINED_RE.captures(line)?
        } else {
            APACHE_COMMON_RE.captures(line)?
        };

        let status_code: u16 = extract_named(&caps, "status_code")?.parse().ok()?;
        let timestamp = extract_named(&caps, "timestamp")
            .map(|ts| parse_apache_timestamp(&ts))
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let method = extract_named(&caps, "method").unwrap_or_default();
        let path = extract_named(&caps, "path").unwrap_or_default();
        let message = format!("{} {} {}", method, path, status_code);

        let mut record = LogRecord::new(timestamp, status_to_level(status_code), message, source, line)
            .with_metadata(
                "log_format",
                if self.combined { "apache_combined" } else { "apache_common" },
            )
            .with_metadata("method", method)
            .with_metadata("path", path)
            .with_metadata("status_code", status_code.to_string());

        if let Some(ip) = extract_named(&caps, "ip_address") {
            record = record.with_metadata("ip_address", ip);
        }
        if let Some(user) = extract_named(&caps, "user_id") {
            if user != "-" {
                record = record.with_metadata("user_id", user);
            }
        }
        if let Some(protocol) = extract_named(&caps, "protocol") {
            record = record.with_metadata("protocol", protocol);
        }
        if let Some(bytes) = extract_named(&caps, "bytes") {
            let bytes = if bytes == "-" { "0".to_string() } else { bytes };
            record = record.with_metadata("bytes", bytes);
        }
        if self.combined {
            if let Some(referer) = extract_named(&caps, "referer") {
                if !referer.is_empty() && referer != "-" {
                    record = record.with_metadata("referer", referer);
                }
            }
            if let Some(ua) = extract_named(&caps, "user_agent") {
                if !ua.is_empty() && ua != "-" {
                    record = record.with_metadata("user_agent", ua);
                }
            }
        }

        Some(record)
    }

    fn format_name(&self) -> &'static str {
        if self.combined {
            "apache_combined"
        } else {
            "apache_common"
        }
    }
}

/// Nginx error log: `2023/01/01 12:00:00 [error] 1234#0: message, client: 1.2.3.4, server: example.com`.
pub struct NginxErrorParser;

impl LogParser for NginxErrorParser {
    fn recognizes(&self, line: &str) -> bool {
        NGINX_ERROR_RE.is_match(line)
    }

    fn parse(&self, line: &str, source: &str) -> Option<LogRecord> {
        let caps = NGINX_ERROR_RE.captures(line)?;
        let level = match extract_named(&caps, "log_level").as_deref() {
            Some("emerg") | Some("alert") | Some("crit") | Some("error") => LogLevel::Error,
            Some("warn") => LogLevel::Warn,
            Some("notice") | Some("info") => LogLevel::Info,
            Some("debug") => LogLevel::Debug,
            _ => LogLevel::Error,
        };
        let timestamp = extract_named(&caps, "timestamp")
            .and_then(|ts| NaiveDateTime::parse_from_str(&ts, "%Y/%m/%d %H:%M:%S").ok())
            .and_then(|naive| naive.and_local_timezone(Utc).single())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let message = extract_named(&caps, "error_message").unwrap_or_default();

        let mut record = LogRecord::new(timestamp, level, message, source, line)
            .with_metadata("log_format", "nginx_error");
        if let Some(pid) = extract_named(&caps, "process_id") {
            record = record.with_metadata("process_id", pid);
        }
        if let Some(client_ip) = extract_named(&caps, "client_ip") {
            record = record.with_metadata("client_ip", client_ip);
        }
        if let Some(server) = extract_named(&caps, "server") {
            record = record.with_metadata("server", server);
        }
        Some(record)
    }

    fn format_name(&self) -> &'static str {
        "nginx_error"
    }
}

/// Reuses the Apache access regexes (Nginx's default access log layout is
/// byte-identical to Apache's), tagging the result distinctly so a caller
/// who invokes it directly (instead of through the priority chain) gets an
/// accurate `log_format`.
struct NginxAccessParser {
    combined: bool,
}

impl LogParser for NginxAccessParser {
    fn recognizes(&self, line: &str) -> bool {
        if self.combined {
            APACHE_COMBINED_RE.is_match(line)
        } else {
            APACHE_COMMON_RE.is_match(line)
        }
    }

    fn parse(&self, line: &str, source: &str) -> Option<LogRecord> {
        let inner = ApacheAccessParser { combined: self.combined };
        let mut record = inner.parse(line, source)?;
        record.metadata.insert(
            "log_format".to_string(),
            if self.combined { "nginx_combined" } else { "nginx_common" }.to_string(),
        );
        Some(record)
    }

    fn format_name(&self) -> &'static str {
        if self.combined {
            "nginx_combined"
        } else {
            "nginx_common"
        }
    }
}

static LEADING_TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)").unwrap());

/// Fallback parser: always recognizes. Extracts a leading ISO-8601
/// timestamp when present, otherwise stamps ingestion time.
pub struct GenericParser;

impl LogParser for GenericParser {
    fn recognizes(&self, _line: &str) -> bool {
        true
    }

    fn parse(&self, line: &str, source: &str) -> Option<LogRecord> {
        let timestamp = LEADING_TIMESTAMP_RE
            .captures(line)
            .and_then(|caps| caps.name("ts"))
            .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok())
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        Some(
            LogRecord::new(timestamp, LogLevel::Unknown, line, source, line)
                .with_metadata("log_format", "generic"),
        )
    }

    fn format_name(&self) -> &'static str {
        "generic"
    }
}

/// Tries each parser's `recognizes` in the fixed priority order:
/// Apache error, Apache combined, Apache common, Nginx error, Nginx
/// combined, Nginx common, then the generic fallback.
pub struct ParserChain {
    parsers: Vec<Box<dyn LogParser>>,
}

impl Default for ParserChain {
    fn default() -> Self {
        Self {
            parsers: vec![
                Box::new(ApacheErrorParser),
                Box::new(ApacheAccessParser { combined: true }),
                Box::new(ApacheAccessParser { combined: false }),
                Box::new(NginxErrorParser),
                Box::new(NginxAccessParser { combined: true }),
                Box::new(NginxAccessParser { combined: false }),
                Box::new(GenericParser),
            ],
        }
    }
}

impl ParserChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw line, trying parsers in priority order. The generic
    /// fallback always recognizes, so this never returns `None`.
    pub fn parse(&self, line: &str, source: &str) -> Option<LogRecord> {
        for parser in &self.parsers {
            if parser.recognizes(line) {
                return parser.parse(line, source);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apache_combined_scenario() {
        let line = r#"127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /x HTTP/1.0" 200 2326 "http://e/" "M""#;
        let chain = ParserChain::new();
        let record = chain.parse(line, "access.log").unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.metadata.get("status_code").unwrap(), "200");
        assert_eq!(record.metadata.get("method").unwrap(), "GET");
        assert_eq!(record.metadata.get("path").unwrap(), "/x");
        assert_eq!(record.metadata.get("log_format").unwrap(), "apache_combined");
        assert_eq!(record.raw_content, line);
    }

    #[test]
    fn apache_common_missing_bytes_maps_to_zero() {
        let line = r#"10.0.0.5 - - [10/Oct/2000:13:55:36 -0700] "GET /y HTTP/1.1" 404 -"#;
        let chain = ParserChain::new();
        let record = chain.parse(line, "access.log").unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.metadata.get("bytes").unwrap(), "0");
        assert_eq!(record.metadata.get("log_format").unwrap(), "apache_common");
    }

    #[test]
    fn apache_error_parses_client_and_level() {
        let line = "[Wed Oct 11 14:32:52 2000] [error] [client 127.0.0.1] something broke";
        let chain = ParserChain::new();
        let record = chain.parse(line, "error.log").unwrap();
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.metadata.get("client_ip").unwrap(), "127.0.0.1");
        assert_eq!(record.message, "something broke");
    }

    #[test]
    fn nginx_error_parses() {
        let line = "2023/01/01 12:00:00 [error] 1234#0: *5 upstream timed out, client: 1.2.3.4, server: example.com";
        let record = NginxErrorParser.parse(line, "nginx_error.log").unwrap();
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.metadata.get("client_ip").unwrap(), "1.2.3.4");
        assert_eq!(record.metadata.get("server").unwrap(), "example.com");
    }

    #[test]
    fn generic_fallback_never_fails() {
        let chain = ParserChain::new();
        let record = chain.parse("just some unstructured text", "stdin").unwrap();
        assert_eq!(record.metadata.get("log_format").unwrap(), "generic");
        assert_eq!(record.raw_content, "just some unstructured text");
    }

    #[test]
    fn recognizes_implies_parse_succeeds_and_preserves_raw_content() {
        let line = r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.0" 200 100"#;
        let parser = ApacheAccessParser { combined: false };
        assert!(parser.recognizes(line));
        let record = parser.parse(line, "s").unwrap();
        assert_eq!(record.raw_content, line);
    }

    #[test]
    fn higher_priority_parser_wins_when_both_recognize() {
        // A combined-format line also satisfies no other parser in the chain,
        // so the chain must select apache_combined, not apache_common.
        let line = r#"127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET / HTTP/1.0" 200 100 "-" "-""#;
        let chain = ParserChain::new();
        let record = chain.parse(line, "s").unwrap();
        assert_eq!(record.metadata.get("log_format").unwrap(), "apache_combined");
    }
}
