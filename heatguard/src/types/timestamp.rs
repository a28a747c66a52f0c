//! Reading timestamps as they arrive on the wire.
//!
//! Sources send either an ISO-8601 string or a bare number of epoch
//! seconds. Both are kept verbatim so alert identifiers reproduce the
//! sender's text, and converted to epoch seconds only for arithmetic.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Epoch(f64),
    Iso(String),
}

impl Timestamp {
    /// Seconds since the Unix epoch.
    ///
    /// Strings are tried as RFC 3339, then as ISO-8601 with or without an
    /// offset (no offset means UTC), then as a decimal number.
    pub fn epoch_seconds(&self) -> Result<f64> {
        match self {
            Timestamp::Epoch(secs) => Ok(*secs),
            Timestamp::Iso(text) => parse_text(text),
        }
    }

    /// Absolute number of seconds between two timestamps.
    pub fn seconds_between(&self, other: &Timestamp) -> Result<f64> {
        Ok((other.epoch_seconds()? - self.epoch_seconds()?).abs())
    }
}

fn parse_text(text: &str) -> Result<f64> {
    let trimmed = text.trim();

    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(to_secs(dt));
    }
    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Iso8601::DEFAULT) {
        return Ok(to_secs(dt));
    }
    if let Ok(dt) = PrimitiveDateTime::parse(trimmed, &Iso8601::DEFAULT) {
        return Ok(to_secs(dt.assume_utc()));
    }

    trimmed
        .parse::<f64>()
        .map_err(|_| Error::Timestamp(text.to_string()))
}

fn to_secs(dt: OffsetDateTime) -> f64 {
    dt.unix_timestamp_nanos() as f64 / 1e9
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Epoch(secs) => write!(f, "{}", secs),
            Timestamp::Iso(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Timestamp::Epoch(secs)
    }
}

impl From<&str> for Timestamp {
    fn from(text: &str) -> Self {
        Timestamp::Iso(text.to_string())
    }
}

/// Current UTC time as RFC 3339 with whole seconds.
pub fn iso8601_now() -> String {
    let now = OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
