use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use super::{DEFAULT_MAX_AGE, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// A parsed SSDP datagram, as seen by a control point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsdpMessage {
    /// Unicast HTTP/1.1 200 reply to one of our M-SEARCH requests.
    SearchResponse {
        usn: String,
        st: String,
        location: String,
        server: String,
        max_age: u32,
    },
    /// Multicast NOTIFY with NTS `ssdp:alive`.
    Alive {
        usn: String,
        nt: String,
        location: String,
        server: String,
        max_age: u32,
    },
    /// Multicast NOTIFY with NTS `ssdp:byebye`.
    ByeBye { usn: String, nt: String },
}

impl SsdpMessage {
    /// The (LOCATION, USN) pair used for retransmission dedup, when present.
    pub fn dedup_key(&self) -> Option<(&str, &str)> {
        match self {
            SsdpMessage::SearchResponse { location, usn, .. }
            | SsdpMessage::Alive { location, usn, .. } => Some((location, usn)),
            SsdpMessage::ByeBye { .. } => None,
        }
    }
}

/// Typed rejection of a malformed or uninteresting datagram.
///
/// None of these are fatal to the caller: a discovery loop logs and skips.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SsdpParseError {
    #[error("empty datagram")]
    Empty,
    #[error("unsupported start line: {0}")]
    UnsupportedStartLine(String),
    #[error("missing required header {0}")]
    MissingHeader(&'static str),
    #[error("unknown NTS value: {0}")]
    UnknownNts(String),
    /// An M-SEARCH from another control point; we are not a device and have
    /// nothing to answer.
    #[error("M-SEARCH query (not addressed to a control point)")]
    SearchQuery,
}

/// Build one M-SEARCH datagram for the given search target.
///
/// `mx` is clamped to at least 1, as the UPnP spec requires.
pub fn build_msearch(st: &str, mx: u32) -> String {
    let mx = mx.max(1);
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}:{}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         USER-AGENT: CastEngine/0.1 UPnP/1.1\r\n\
         \r\n",
        SSDP_MULTICAST_ADDR, SSDP_PORT, mx, st
    )
}

/// Parse one SSDP datagram into a typed message.
pub fn parse_ssdp_message(data: &str) -> Result<SsdpMessage, SsdpParseError> {
    let mut lines = data.lines();
    let first_line = lines.next().ok_or(SsdpParseError::Empty)?.trim();
    let upper = first_line.to_ascii_uppercase();
    let headers = Headers::parse(lines);

    if upper.starts_with("NOTIFY ") {
        parse_notify(&headers)
    } else if upper.starts_with("HTTP/") && upper.contains(" 200 ") {
        parse_search_response(&headers)
    } else if upper.starts_with("M-SEARCH ") {
        Err(SsdpParseError::SearchQuery)
    } else {
        Err(SsdpParseError::UnsupportedStartLine(first_line.to_string()))
    }
}

fn parse_notify(headers: &Headers) -> Result<SsdpMessage, SsdpParseError> {
    let nts = headers.required("NTS")?.to_ascii_lowercase();
    let nt = headers.required("NT")?;
    let usn = headers.required("USN")?;

    match nts.as_str() {
        "ssdp:alive" => Ok(SsdpMessage::Alive {
            usn,
            nt,
            location: headers.required("LOCATION")?,
            server: headers.server(),
            max_age: headers.max_age(),
        }),
        "ssdp:byebye" => Ok(SsdpMessage::ByeBye { usn, nt }),
        // ssdp:update and vendor extensions are ignored; an update is always
        // followed by fresh alive announcements anyway.
        other => Err(SsdpParseError::UnknownNts(other.to_string())),
    }
}

fn parse_search_response(headers: &Headers) -> Result<SsdpMessage, SsdpParseError> {
    Ok(SsdpMessage::SearchResponse {
        st: headers.required("ST")?,
        usn: headers.required("USN")?,
        location: headers.required("LOCATION")?,
        server: headers.server(),
        max_age: headers.max_age(),
    })
}

/// Header section of one datagram, names folded to upper case.
struct Headers(HashMap<String, String>);

impl Headers {
    /// Collect headers up to the first blank line. A duplicate name keeps
    /// the later value; lines without a colon are skipped.
    fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let map = lines
            .map(str::trim)
            .take_while(|line| !line.is_empty())
            .filter_map(|line| {
                // First ':' only; header values contain colons (URLs do).
                let (name, value) = line.split_once(':')?;
                let name = name.trim();
                let value = value.trim();
                if name.is_empty() || value.is_empty() {
                    trace!(line, "skipping malformed SSDP header");
                    return None;
                }
                Some((name.to_ascii_uppercase(), value.to_string()))
            })
            .collect();
        Self(map)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    fn required(&self, name: &'static str) -> Result<String, SsdpParseError> {
        self.get(name)
            .map(String::from)
            .ok_or(SsdpParseError::MissingHeader(name))
    }

    fn server(&self) -> String {
        self.get("SERVER").unwrap_or("Unknown").to_string()
    }

    /// Seconds from the CACHE-CONTROL `max-age` directive, tolerating other
    /// directives and junk after the digits. Absent or unreadable values get
    /// the protocol default.
    fn max_age(&self) -> u32 {
        let Some(value) = self.get("CACHE-CONTROL") else {
            return DEFAULT_MAX_AGE;
        };
        value
            .split(',')
            .find_map(|directive| {
                let (key, seconds) = directive.split_once('=')?;
                if !key.trim().eq_ignore_ascii_case("max-age") {
                    return None;
                }
                let seconds = seconds.trim();
                let digits_end = seconds
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(seconds.len());
                seconds[..digits_end].parse().ok()
            })
            .unwrap_or_else(|| {
                trace!(value, "unusable CACHE-CONTROL, assuming default max-age");
                DEFAULT_MAX_AGE
            })
    }
}
