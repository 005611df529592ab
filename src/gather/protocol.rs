//! Line formats of the estimate exchange.
//!
//! A reply body is a sequence of lines, each either an `OPTIONS` line, a
//! host-level `ERROR`/`WARNING`, or a per-disk result:
//!
//! ```text
//! OPTIONS features=ffff;
//! /home 0 SIZE 102400
//! "/data set" 1 ERROR "permission denied"
//! ```

use std::sync::LazyLock;
use thiserror::Error;

static OPTIONS_FEATURES_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?:^|[\s;])features=([^;\s]*)").unwrap());
static HOST_MESSAGE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^(ERROR|WARNING)\s+(.*)$").unwrap());
static DISK_LINE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r#"^("(?:[^"\\]|\\.)*"|\S+)\s+(-?\d+)\s+(?:SIZE\s+(-?\d+)|(?:ERROR|WARNING)\s+(.*?))\s*$"#,
    )
    .unwrap()
});

/// Reply text that could not be understood.
#[derive(Debug, Error)]
pub(crate) enum ProtocolError {
    #[error("bad features value: {0}")]
    BadFeatures(String),

    #[error("badly formatted line: {0}")]
    BadLine(String),

    #[error("NAK parse failed")]
    NakParse,
}

/// Severity of a host-level message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Error,
    Warning,
}

/// One parsed line of a reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyLine {
    /// Negotiated options; only the feature string is used.
    Options { features: Option<String> },
    /// The whole host failed.
    HostMessage { severity: Severity, message: String },
    /// A size in KB; -2 withdraws the level.
    Size { disk: String, level: i32, size: i64 },
    /// The client could not size this disk.
    DiskMessage { disk: String, level: i32, message: String },
}

/// Quote a string when it contains whitespace, quotes, backslashes or
/// control characters.
pub(crate) fn quote_string(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }
    if !s.chars().any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '\\') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{c}' => out.push_str("\\f"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Inverse of [`quote_string`]; unquoted input is returned as is.
pub(crate) fn unquote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {}
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('f') => out.push('\u{c}'),
                Some(other) => out.push(other),
                None => {}
            },
            c => out.push(c),
        }
    }
    out
}

fn parse_line(line: &str) -> Result<ReplyLine, ProtocolError> {
    if line.starts_with("OPTIONS ") {
        let features = OPTIONS_FEATURES_RE.captures(line).map(|caps| caps[1].to_string());
        return Ok(ReplyLine::Options { features });
    }

    if let Some(caps) = HOST_MESSAGE_RE.captures(line) {
        let severity = if &caps[1] == "ERROR" { Severity::Error } else { Severity::Warning };
        return Ok(ReplyLine::HostMessage { severity, message: caps[2].trim().to_string() });
    }

    let caps = DISK_LINE_RE
        .captures(line)
        .ok_or_else(|| ProtocolError::BadLine(line.to_string()))?;
    let disk = unquote_string(&caps[1]);
    let level = caps[2].parse().map_err(|_| ProtocolError::BadLine(line.to_string()))?;

    if let Some(size) = caps.get(3) {
        let size = size.as_str().parse().map_err(|_| ProtocolError::BadLine(line.to_string()))?;
        return Ok(ReplyLine::Size { disk, level, size });
    }
    let message = caps.get(4).map_or_else(String::new, |m| unquote_string(m.as_str()));
    Ok(ReplyLine::DiskMessage { disk, level, message })
}

/// Parse every non-empty line of a reply body.
pub(crate) fn parse_reply(body: &str) -> Result<Vec<ReplyLine>, ProtocolError> {
    body.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

/// Extract the remote error from a NAK body (`ERROR <message>`).
pub(crate) fn parse_nak(body: &str) -> Result<String, ProtocolError> {
    let first = body.lines().next().unwrap_or_default();
    let message = first.strip_prefix("ERROR ").ok_or(ProtocolError::NakParse)?.trim_start();
    if message.is_empty() {
        return Err(ProtocolError::NakParse);
    }
    Ok(message.to_string())
}

/// NAK messages that only mean the client predates capability probing.
pub(crate) fn is_unknown_noop(message: &str) -> bool {
    message == "unknown service: noop" || message == "noop: invalid service"
}
