use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// A remote tag of an image in the managed namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub image_name: String,
    pub name: String,
    /// `None` when the registry reports no update time or it can't be parsed
    pub last_updated: Option<PrimitiveDateTime>,
    pub digest_prefix: String,
}

impl Tag {
    /// Date the tag was last updated, with the time of day dropped.
    pub fn updated_on(&self) -> Option<Date> {
        self.last_updated.map(|x| x.date())
    }

    pub fn fmt_last_updated(&self) -> String {
        let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
        self.last_updated
            .and_then(|x| x.format(&format).ok())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn fmt_age(&self, now: OffsetDateTime) -> String {
        match self.last_updated {
            Some(updated) => fmt_age(now.unix_timestamp() - updated.assume_utc().unix_timestamp()),
            None => "Unknown".to_string(),
        }
    }
}

/// Parse a Docker Hub `last_updated` value.
///
/// Everything after the seconds field (fraction and zone suffix) is dropped,
/// so `2023-01-10T17:30:45.123456Z` and `2023-01-10T17:30:45-05:00` are both
/// read as `2023-01-10T17:30:45`.
pub fn parse_last_updated(raw: &str) -> Option<PrimitiveDateTime> {
    let stamp = raw.get(..19)?;
    let rest = &raw[19..];
    if !rest.is_empty() && !rest.starts_with(['.', 'Z', '+', '-']) {
        return None;
    }

    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(stamp, &format).ok()
}

/// Only `sha256:` and the first 10 hex characters are kept, the full digest is too long for a table.
pub fn digest_prefix(digest: Option<&str>) -> String {
    match digest {
        Some(digest) => digest.chars().take(17).collect(),
        None => "Unknown".to_string(),
    }
}

fn fmt_age(age: i64) -> String {
    if age >= 86400 {
        format!("{} Days", age / 86400)
    } else if age >= 3600 {
        format!("{} Hours", age / 3600)
    } else if age >= 60 {
        format!("{} Minutes", age / 60)
    } else {
        format!("{age} Seconds")
    }
}
