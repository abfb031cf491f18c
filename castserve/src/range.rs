//! HTTP byte-range parsing.
//!
//! Renderers seek by issuing `Range: bytes=a-b` requests, and most only ever
//! send a single range. Multi-range requests are legal HTTP but no renderer
//! uses them, so they are answered with the full entity instead of
//! `multipart/byteranges`.

/// Outcome of parsing a Range header against a known entity size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No Range header, or a form we deliberately serve in full.
    Full,
    /// A satisfiable single range, both bounds inclusive.
    Partial { start: u64, end: u64 },
    /// Syntactically a range but nothing in it can be served.
    Unsatisfiable,
}

impl ByteRange {
    pub fn len(self) -> Option<u64> {
        match self {
            ByteRange::Partial { start, end } => Some(end - start + 1),
            _ => None,
        }
    }
}

/// Parse a Range header value against `total` bytes.
///
/// Handles the three single-range forms: `bytes=a-b`, `bytes=a-` and
/// `bytes=-n`. An `end` past the entity is clamped per RFC 9110; a `start`
/// past the entity is unsatisfiable.
pub fn parse_range(header: Option<&str>, total: u64) -> ByteRange {
    let Some(value) = header else {
        return ByteRange::Full;
    };

    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        // Unknown unit: ignore the header.
        return ByteRange::Full;
    };

    if spec.contains(',') {
        return ByteRange::Full;
    }

    let Some((raw_start, raw_end)) = spec.split_once('-') else {
        return ByteRange::Unsatisfiable;
    };
    let raw_start = raw_start.trim();
    let raw_end = raw_end.trim();

    // Suffix form: the last n bytes.
    if raw_start.is_empty() {
        let Ok(suffix) = raw_end.parse::<u64>() else {
            return ByteRange::Unsatisfiable;
        };
        if suffix == 0 || total == 0 {
            return ByteRange::Unsatisfiable;
        }
        let len = suffix.min(total);
        return ByteRange::Partial {
            start: total - len,
            end: total - 1,
        };
    }

    let Ok(start) = raw_start.parse::<u64>() else {
        return ByteRange::Unsatisfiable;
    };
    if start >= total {
        return ByteRange::Unsatisfiable;
    }

    let end = if raw_end.is_empty() {
        total - 1
    } else {
        match raw_end.parse::<u64>() {
            Ok(end) if end >= start => end.min(total - 1),
            _ => return ByteRange::Unsatisfiable,
        }
    };

    ByteRange::Partial { start, end }
}
