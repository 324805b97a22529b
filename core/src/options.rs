//! Build options shared by every build entry point.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{ForgeError, Result};
use crate::platform::Architecture;

/// Environment variable carrying the reproducible build timestamp.
pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// Options for a single image build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Timestamp stamped on the config, history and annotations
    pub source_date_epoch: DateTime<Utc>,

    /// Target architecture
    pub arch: Architecture,
}

impl BuildOptions {
    pub fn new(source_date_epoch: DateTime<Utc>, arch: Architecture) -> Self {
        Self {
            source_date_epoch,
            arch,
        }
    }

    /// Build options with the timestamp taken from `SOURCE_DATE_EPOCH`.
    ///
    /// An unset variable means the Unix epoch. The wall clock is never used.
    pub fn from_env(arch: Architecture) -> Result<Self> {
        let value = std::env::var(SOURCE_DATE_EPOCH).ok();
        let created = parse_source_date_epoch(value.as_deref())?;
        Ok(Self::new(created, arch))
    }
}

/// Parse a `SOURCE_DATE_EPOCH` value (integer seconds since the epoch).
pub fn parse_source_date_epoch(value: Option<&str>) -> Result<DateTime<Utc>> {
    let value = match value.map(str::trim) {
        None | Some("") => return Ok(DateTime::<Utc>::UNIX_EPOCH),
        Some(v) => v,
    };

    let secs: i64 = value.parse().map_err(|e| {
        ForgeError::Config(format!(
            "Invalid {} '{}': {}",
            SOURCE_DATE_EPOCH, value, e
        ))
    })?;

    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        ForgeError::Config(format!(
            "Invalid {} '{}': timestamp out of range",
            SOURCE_DATE_EPOCH, value
        ))
    })
}
