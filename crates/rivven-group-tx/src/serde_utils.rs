//! Serde helpers for time values in snapshots and configuration.
//!
//! Both encode as whole milliseconds so that snapshots stay compact and
//! identical across platforms.

/// Serialization helpers for SystemTime (milliseconds since the Unix epoch)
pub mod system_time {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

/// Serialization helpers for Duration (as milliseconds)
pub mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Truncate a timestamp to millisecond precision, the resolution snapshots keep.
pub fn truncate_to_millis(time: std::time::SystemTime) -> std::time::SystemTime {
    use std::time::{Duration, UNIX_EPOCH};

    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_millis(d.as_millis() as u64),
        Err(_) => UNIX_EPOCH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Timed {
        #[serde(with = "system_time")]
        at: SystemTime,
        #[serde(with = "duration")]
        timeout: Duration,
    }

    #[test]
    fn test_postcard_millis() {
        let original = Timed {
            at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            timeout: Duration::from_secs(30),
        };

        let bytes = postcard::to_allocvec(&original).unwrap();
        let decoded: Timed = postcard::from_bytes(&bytes).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let at = UNIX_EPOCH + Duration::from_nanos(1_500_000_999);
        let original = Timed {
            at,
            timeout: Duration::from_micros(2_500),
        };

        let json = serde_json::to_string(&original).unwrap();
        let decoded: Timed = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.at, truncate_to_millis(at));
        assert_eq!(decoded.timeout, Duration::from_millis(2));
    }
}
