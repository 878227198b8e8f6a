use crate::ArcStr;
use anyhow::format_err;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Parse a string, but map "null" to `None` (in addition to the default "" -> None mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    if s.eq_ignore_ascii_case("null") || s.is_empty() {
        Ok(None)
    } else {
        Ok(Some(s.into()))
    }
}

/// Like `optional_string`, but lowercases the value.
///
/// Category columns are compared case-insensitively everywhere, so normalize once at load.
pub fn optional_category<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    let s = s.trim();
    if s.eq_ignore_ascii_case("null") || s.is_empty() {
        Ok(None)
    } else {
        Ok(Some(s.to_ascii_lowercase().into()))
    }
}

/// Parse a numeric value, mapping ""/"null"/"na" to `None`.
pub fn optional_f64<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("na") {
        return Ok(None);
    }
    s.parse::<f64>()
        .map(Some)
        .map_err(|e| de::Error::custom(format!("{}", e)))
}

/// Parse a timestamp column, mapping the empty string to `None`.
pub fn opt_dttm<'de, D>(d: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    parse_dttm(s)
        .map(Some)
        .map_err(|e| de::Error::custom(format!("{}", e)))
}

/// Parse a date column, mapping the empty string to `None`.
///
/// Accepts a bare date or a full timestamp (the date part is kept).
pub fn opt_date<'de, D>(d: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    parse_dttm(s)
        .map(|dttm| Some(dttm.date_naive()))
        .map_err(|e| de::Error::custom(format!("{}", e)))
}

/// Parse the timestamp formats that appear in site extracts.
///
/// Offset-free timestamps are taken as UTC, which is what the consortium schema mandates for
/// `_dttm` columns.
pub(crate) fn parse_dttm(s: &str) -> crate::Result<DateTime<Utc>> {
    if let Ok(dttm) = DateTime::parse_from_rfc3339(s) {
        return Ok(dttm.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format_err!("unrecognized timestamp \"{}\"", s))
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formats() {
        let expect = Utc.with_ymd_and_hms(2023, 5, 1, 14, 30, 0).unwrap();
        assert_eq!(parse_dttm("2023-05-01 14:30:00").unwrap(), expect);
        assert_eq!(parse_dttm("2023-05-01T14:30:00").unwrap(), expect);
        assert_eq!(parse_dttm("2023-05-01T14:30:00Z").unwrap(), expect);
        assert_eq!(parse_dttm("2023-05-01T14:30:00+00:00").unwrap(), expect);
        assert_eq!(parse_dttm("2023-05-01 14:30").unwrap(), expect);
        assert!(parse_dttm("not a time").is_err());
    }

    #[test]
    fn date_only_timestamp_is_midnight() {
        let dttm = parse_dttm("2023-05-01").unwrap();
        assert_eq!(dttm, Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap());
    }
}
