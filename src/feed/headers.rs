//! Freshness metadata: ETag / Last-Modified extraction and conditional-GET headers.
//!
//! Missing or malformed fields are `None`, never errors.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};

/// IMF-fixdate, the preferred HTTP-date form (RFC 9110 §5.6.7).
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// Obsolete RFC 850 form, still emitted by some servers.
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
/// ANSI C `asctime()` form.
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Finds the value of header `name` in a raw header block.
///
/// Lines may end in CRLF or LF; the status line and anything without a
/// colon are ignored. Names compare case-insensitively.
fn header_value<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Extracts the `ETag` value from a raw HTTP header block.
///
/// The value is opaque: quotes and weak `W/` prefixes are preserved so it can
/// be echoed back verbatim in `If-None-Match`.
pub fn etag_from_header(raw: &str) -> Option<String> {
    header_value(raw, "etag").map(str::to_owned)
}

/// Extracts and parses `Last-Modified` from a raw HTTP header block.
pub fn last_modified_from_header(raw: &str) -> Option<DateTime<Utc>> {
    header_value(raw, "last-modified").and_then(parse_http_date)
}

/// `ETag` from a parsed response header map.
pub fn etag_from_map(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// `Last-Modified` from a parsed response header map.
pub fn last_modified_from_map(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

/// Parses any of the three HTTP-date forms.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    [IMF_FIXDATE, RFC_850, ASCTIME]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Renders a timestamp as an IMF-fixdate (`Wed, 28 Jan 2009 04:10:32 GMT`).
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(IMF_FIXDATE).to_string()
}

/// Builds `If-None-Match` / `If-Modified-Since` from stored freshness values.
///
/// An ETag that is not a valid header value is skipped with a warning.
pub fn conditional_headers(etag: Option<&str>, last_modified: Option<DateTime<Utc>>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(etag) = etag {
        match HeaderValue::from_str(etag) {
            Ok(value) => {
                headers.insert(IF_NONE_MATCH, value);
            }
            Err(e) => {
                tracing::warn!(etag = %etag, error = %e, "Stored ETag is not a valid header value, skipping");
            }
        }
    }

    if let Some(at) = last_modified {
        if let Ok(value) = HeaderValue::from_str(&format_http_date(at)) {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HEADER: &str = "HTTP/1.0 200 OK\r\nDate: Thu, 29 Jan 2009 03:55:24 GMT\r\nServer: Apache\r\nX-FB-Host: chi-write6\r\nLast-Modified: Wed, 28 Jan 2009 04:10:32 GMT\r\nETag: ziEyTl4q9GH04BR4jgkImd0GvSE\r\nP3P: CP=\"ALL DSP COR NID CUR OUR NOR\"\r\nConnection: close\r\nContent-Type: text/xml;charset=utf-8\r\n\r\n";

    fn jan_28() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2009, 1, 28, 4, 10, 32).unwrap()
    }

    #[test]
    fn test_etag_from_header() {
        assert_eq!(
            etag_from_header(HEADER).as_deref(),
            Some("ziEyTl4q9GH04BR4jgkImd0GvSE")
        );
    }

    #[test]
    fn test_etag_missing_is_none() {
        assert_eq!(etag_from_header("foo"), None);
        assert_eq!(etag_from_header("ETag:   \r\n"), None);
    }

    #[test]
    fn test_etag_keeps_quotes_and_weak_prefix() {
        let raw = "HTTP/1.1 200 OK\r\netag: W/\"abc-123\"\r\n\r\n";
        assert_eq!(etag_from_header(raw).as_deref(), Some("W/\"abc-123\""));
    }

    #[test]
    fn test_last_modified_from_header() {
        assert_eq!(last_modified_from_header(HEADER), Some(jan_28()));
    }

    #[test]
    fn test_last_modified_missing_or_malformed_is_none() {
        assert_eq!(last_modified_from_header("foo"), None);
        assert_eq!(
            last_modified_from_header("Last-Modified: yesterday-ish\r\n"),
            None
        );
    }

    #[test]
    fn test_parse_obsolete_date_forms() {
        assert_eq!(
            parse_http_date("Wednesday, 28-Jan-09 04:10:32 GMT"),
            Some(jan_28())
        );
        assert_eq!(parse_http_date("Wed Jan 28 04:10:32 2009"), Some(jan_28()));
    }

    #[test]
    fn test_format_http_date() {
        assert_eq!(format_http_date(jan_28()), "Wed, 28 Jan 2009 04:10:32 GMT");
    }

    #[test]
    fn test_conditional_headers() {
        let headers = conditional_headers(Some("\"v1\""), Some(jan_28()));
        assert_eq!(headers.get(IF_NONE_MATCH).unwrap(), "\"v1\"");
        assert_eq!(
            headers.get(IF_MODIFIED_SINCE).unwrap(),
            "Wed, 28 Jan 2009 04:10:32 GMT"
        );

        assert!(conditional_headers(None, None).is_empty());
        assert!(conditional_headers(Some("bad\nvalue"), None).is_empty());
    }

    #[test]
    fn test_map_extraction() {
        let mut map = HeaderMap::new();
        map.insert(ETAG, HeaderValue::from_static("\"xyz\""));
        map.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Wed, 28 Jan 2009 04:10:32 GMT"),
        );
        assert_eq!(etag_from_map(&map).as_deref(), Some("\"xyz\""));
        assert_eq!(last_modified_from_map(&map), Some(jan_28()));
        assert_eq!(etag_from_map(&HeaderMap::new()), None);
    }
}
