//! Opaque pagination tokens.
//!
//! A cursor marks "resume listing strictly after this instant". On the wire it
//! is the instant as UTC RFC 3339 text (sub-second digits only when needed),
//! wrapped in standard base64. Years outside 0000-9999 use the ISO 8601
//! expanded form (`+10000-01-01T00:00:00Z`, `-0001-...`) so every
//! `DateTime<Utc>` has a token. Decoding is an input boundary: anything that
//! is not exactly what `encode` would have produced is rejected.

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Datelike, SecondsFormat, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// Not valid base64, or the decoded bytes are not UTF-8.
    Encoding(String),
    /// Decoded text is not an RFC 3339 timestamp.
    Timestamp(String),
    /// A parseable timestamp, but not in the canonical form `encode` emits.
    NotCanonical,
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorError::Encoding(e) => write!(f, "invalid cursor encoding: {e}"),
            CursorError::Timestamp(e) => write!(f, "invalid cursor timestamp: {e}"),
            CursorError::NotCanonical => write!(f, "invalid cursor: not in canonical form"),
        }
    }
}

impl std::error::Error for CursorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaginationCursor(DateTime<Utc>);

impl PaginationCursor {
    pub fn new(after: DateTime<Utc>) -> Self {
        Self(after)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn encode(&self) -> String {
        BASE64.encode(canonical_text(&self.0))
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let bytes = BASE64
            .decode(token)
            .map_err(|e| CursorError::Encoding(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|e| CursorError::Encoding(e.to_string()))?;
        let parsed = parse_text(&text)?;
        if canonical_text(&parsed) != text {
            return Err(CursorError::NotCanonical);
        }
        Ok(Self(parsed))
    }
}

fn canonical_text(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_text(text: &str) -> Result<DateTime<Utc>, CursorError> {
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'+') => (false, &text[1..]),
        Some(b'-') => (true, &text[1..]),
        _ => return parse_rfc3339(text),
    };
    let digits = rest.find('-').unwrap_or(rest.len());
    let (year, tail) = rest.split_at(digits);
    if year.is_empty() || !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CursorError::Timestamp(format!("invalid expanded year in {text:?}")));
    }
    let year: i32 = year
        .parse()
        .map_err(|e: std::num::ParseIntError| CursorError::Timestamp(e.to_string()))?;
    let year = if negative { -year } else { year };
    // 2000 is a leap year, so Feb 29 parses here and `with_year` rejects it
    // for years that lack it.
    parse_rfc3339(&format!("2000{tail}"))?
        .with_year(year)
        .ok_or_else(|| CursorError::Timestamp(format!("year {year} out of range")))
}

fn parse_rfc3339(text: &str) -> Result<DateTime<Utc>, CursorError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CursorError::Timestamp(e.to_string()))
}

impl fmt::Display for PaginationCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for PaginationCursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trip_exact() {
        let samples = [
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.with_ymd_and_hms(2030, 6, 15, 9, 30, 0).unwrap(),
            Utc.timestamp_opt(1_900_000_000, 123_000_000).unwrap(),
            Utc.timestamp_opt(1_900_000_000, 123_456).unwrap(),
            Utc.timestamp_opt(1_900_000_000, 1).unwrap(),
            Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap(),
            Utc::now(),
        ];
        for t in samples {
            let token = PaginationCursor::new(t).encode();
            let back = PaginationCursor::decode(&token).unwrap();
            assert_eq!(back.timestamp(), t, "token {token}");
        }
    }

    #[test]
    fn years_past_9999_round_trip() {
        let t = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let token = PaginationCursor::new(t).encode();
        assert_eq!(BASE64.decode(&token).unwrap(), b"+10000-01-01T00:00:00Z");
        assert_eq!(PaginationCursor::decode(&token).unwrap().timestamp(), t);
    }

    #[test]
    fn full_range_round_trips() {
        let samples = [
            DateTime::<Utc>::MIN_UTC,
            DateTime::<Utc>::MAX_UTC,
            Utc.with_ymd_and_hms(-1, 6, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(0, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(10000, 2, 29, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap() - chrono::TimeDelta::nanoseconds(1),
        ];
        for t in samples {
            let token = PaginationCursor::new(t).encode();
            let back = PaginationCursor::decode(&token).unwrap();
            assert_eq!(back.timestamp(), t, "token {token}");
        }
    }

    #[test]
    fn non_canonical_expanded_years_rejected() {
        for text in ["+2030-01-02T03:04:05Z", "+010000-01-01T00:00:00Z", "-0000-01-01T00:00:00Z"] {
            assert_eq!(
                PaginationCursor::decode(&BASE64.encode(text)),
                Err(CursorError::NotCanonical),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn malformed_expanded_years_rejected() {
        // 10001 is not a leap year.
        for text in ["+10001-02-29T00:00:00Z", "+-01-01T00:00:00Z", "+1x000-01-01T00:00:00Z", "+99999999999-01-01T00:00:00Z"] {
            assert!(
                matches!(
                    PaginationCursor::decode(&BASE64.encode(text)),
                    Err(CursorError::Timestamp(_))
                ),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn token_is_base64_of_utc_rfc3339() {
        let t = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let token = PaginationCursor::new(t).encode();
        assert_eq!(BASE64.decode(&token).unwrap(), b"2030-01-02T03:04:05Z");
    }

    #[test]
    fn garbage_rejected() {
        for token in ["", "!!!!", "not base64 at all", "aGVsbG8=", "////"] {
            assert!(PaginationCursor::decode(token).is_err(), "accepted {token:?}");
        }
    }

    #[test]
    fn invalid_utf8_rejected() {
        let token = BASE64.encode([0xff, 0xfe, 0xfd]);
        assert!(matches!(
            PaginationCursor::decode(&token),
            Err(CursorError::Encoding(_))
        ));
    }

    #[test]
    fn non_timestamp_text_rejected() {
        let token = BASE64.encode("2030-13-45T99:00:00Z");
        assert!(matches!(
            PaginationCursor::decode(&token),
            Err(CursorError::Timestamp(_))
        ));
    }

    #[test]
    fn non_utc_offset_rejected() {
        let token = BASE64.encode("2030-01-02T05:04:05+02:00");
        assert_eq!(
            PaginationCursor::decode(&token),
            Err(CursorError::NotCanonical)
        );
    }

    #[test]
    fn padded_fraction_rejected() {
        let token = BASE64.encode("2030-01-02T03:04:05.000Z");
        assert_eq!(
            PaginationCursor::decode(&token),
            Err(CursorError::NotCanonical)
        );
    }

    #[test]
    fn tampered_token_rejected() {
        let t = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let mut token = PaginationCursor::new(t).encode();
        token.insert(3, '#');
        assert!(PaginationCursor::decode(&token).is_err());
    }

    #[test]
    fn display_and_from_str_agree() {
        let cursor = PaginationCursor::new(Utc::now());
        let parsed: PaginationCursor = cursor.to_string().parse().unwrap();
        assert_eq!(parsed, cursor);
    }
}
