//! Compact duration text (`500ms`, `2s`, `5m`, `1h`) used by plan documents and configuration.

use std::time::Duration;

/// Parse a duration written as `<number><unit>` where unit is `ms`, `s`, `m`, or `h`.
///
/// A bare number is read as seconds. Returns `None` for empty or malformed input.
///
/// ```rust
/// use stagehand_types::duration::parse_duration_text;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_text("250ms"), Some(Duration::from_millis(250)));
/// assert_eq!(parse_duration_text("2s"), Some(Duration::from_secs(2)));
/// assert_eq!(parse_duration_text("5m"), Some(Duration::from_secs(300)));
/// assert_eq!(parse_duration_text("7"), Some(Duration::from_secs(7)));
/// assert_eq!(parse_duration_text("soon"), None);
/// ```
pub fn parse_duration_text(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let split_index = trimmed.find(|character: char| !character.is_ascii_digit()).unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_index);
    let value: u64 = number.parse().ok()?;
    match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}

/// Render a duration using the largest unit that represents it exactly.
pub fn format_duration_text(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

/// Serde adapter reading and writing [`Duration`] as duration text.
pub mod text {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration_text(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration_text(&raw).ok_or_else(|| D::Error::custom(format!("invalid duration '{raw}'")))
    }
}

/// Serde adapter for optional duration text.
pub mod text_option {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_str(&super::format_duration_text(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => super::parse_duration_text(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid duration '{raw}'"))),
            None => Ok(None),
        }
    }
}

/// Serde adapter writing [`Duration`] as whole milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_largest_exact_unit() {
        assert_eq!(format_duration_text(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration_text(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration_text(Duration::from_secs(120)), "2m");
        assert_eq!(format_duration_text(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration_text(Duration::ZERO), "0s");
    }

    #[test]
    fn rejects_unknown_units() {
        assert_eq!(parse_duration_text("3d"), None);
        assert_eq!(parse_duration_text("ms"), None);
        assert_eq!(parse_duration_text(""), None);
    }
}
