//! Byte-range parsing and content-range formatting.
//!
//! Matches standard partial-content wire semantics: an unmodified downstream
//! client must not be able to distinguish locally served slices from a real
//! origin. Anything this path cannot parse is reported as such so the caller
//! can pass the request through instead of failing it.

/// A syntactically valid range evaluated against a payload length.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Inclusive slice bounds, clamped to the payload.
    Satisfiable { start: u64, end: u64 },
    /// Valid syntax but nothing to serve (416 with `bytes */total`).
    Unsatisfiable,
}

/// Parse a `Range` header value (`bytes=start-end`, end optional and
/// inclusive, or the suffix form `bytes=-n`) against a payload of `total`
/// bytes.
///
/// Returns `None` for anything outside that grammar, including multipart
/// range lists; the caller treats that as a protocol mismatch and passes the
/// request through to the real network.
pub fn parse_range(header: &str, total: u64) -> Option<RangeOutcome> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        // Multipart ranges are not served locally.
        return None;
    }

    let (start_raw, end_raw) = spec.split_once('-')?;
    let start_raw = start_raw.trim();
    let end_raw = end_raw.trim();

    if start_raw.is_empty() {
        // Suffix form: the final `n` bytes.
        let suffix: u64 = end_raw.parse().ok()?;
        if suffix == 0 || total == 0 {
            return Some(RangeOutcome::Unsatisfiable);
        }
        let start = total.saturating_sub(suffix);
        return Some(RangeOutcome::Satisfiable {
            start,
            end: total - 1,
        });
    }

    let start: u64 = start_raw.parse().ok()?;
    let end: Option<u64> = if end_raw.is_empty() {
        None
    } else {
        let end = end_raw.parse().ok()?;
        if end < start {
            return None;
        }
        Some(end)
    };

    if total == 0 || start >= total {
        return Some(RangeOutcome::Unsatisfiable);
    }
    let end = end.map_or(total - 1, |e| e.min(total - 1));
    Some(RangeOutcome::Satisfiable { start, end })
}

/// `Content-Range` value for a served slice: `bytes start-end/total`.
pub fn content_range(start: u64, end: u64, total: u64) -> String {
    format!("bytes {start}-{end}/{total}")
}

/// `Content-Range` value for an unsatisfiable request: `bytes */total`.
pub fn unsatisfiable_content_range(total: u64) -> String {
    format!("bytes */{total}")
}

#[cfg(test)]
mod tests {
    use super::{RangeOutcome, content_range, parse_range, unsatisfiable_content_range};

    #[test]
    fn plain_range() {
        assert_eq!(
            parse_range("bytes=100-199", 1000),
            Some(RangeOutcome::Satisfiable {
                start: 100,
                end: 199
            })
        );
    }

    #[test]
    fn open_ended_range_defaults_to_end_of_file() {
        assert_eq!(
            parse_range("bytes=950-", 1000),
            Some(RangeOutcome::Satisfiable {
                start: 950,
                end: 999
            })
        );
    }

    #[test]
    fn end_is_clamped_to_payload() {
        assert_eq!(
            parse_range("bytes=900-4000", 1000),
            Some(RangeOutcome::Satisfiable {
                start: 900,
                end: 999
            })
        );
    }

    #[test]
    fn suffix_range() {
        assert_eq!(
            parse_range("bytes=-500", 1000),
            Some(RangeOutcome::Satisfiable {
                start: 500,
                end: 999
            })
        );
        // Suffix longer than the payload serves the whole payload.
        assert_eq!(
            parse_range("bytes=-5000", 1000),
            Some(RangeOutcome::Satisfiable { start: 0, end: 999 })
        );
    }

    #[test]
    fn unsatisfiable_starts() {
        assert_eq!(
            parse_range("bytes=1000-", 1000),
            Some(RangeOutcome::Unsatisfiable)
        );
        assert_eq!(
            parse_range("bytes=0-10", 0),
            Some(RangeOutcome::Unsatisfiable)
        );
        assert_eq!(
            parse_range("bytes=-0", 1000),
            Some(RangeOutcome::Unsatisfiable)
        );
    }

    #[test]
    fn unparsable_specs_pass_through() {
        assert_eq!(parse_range("items=0-1", 1000), None);
        assert_eq!(parse_range("bytes=a-b", 1000), None);
        assert_eq!(parse_range("bytes=0-1,5-9", 1000), None);
        assert_eq!(parse_range("bytes=", 1000), None);
        // Inverted bounds are a syntax error, not an unsatisfiable range.
        assert_eq!(parse_range("bytes=10-5", 1000), None);
    }

    #[test]
    fn content_range_formatting() {
        assert_eq!(content_range(100, 199, 1000), "bytes 100-199/1000");
        assert_eq!(unsatisfiable_content_range(1000), "bytes */1000");
    }
}
