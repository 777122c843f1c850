//! Serde helpers for configuration values

/// Durations written as whole seconds
///
/// Serializes as an integer number of seconds. Deserializes from either an
/// integer (`30`) or a string with a unit suffix (`"30s"`, `"5m"`, `"1h"`).
/// The string `"off"` reads as zero, which callers treat as "no limit".
pub mod duration_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds or a suffixed string
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(D::Error::custom),
        }
    }

    /// Parse `"off"`, `"<n>"`, `"<n>s"`, `"<n>m"` or `"<n>h"`
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("off") {
            return Ok(Duration::ZERO);
        }
        let (digits, scale) = match text.char_indices().last() {
            Some((i, 's')) => (&text[..i], 1),
            Some((i, 'm')) => (&text[..i], 60),
            Some((i, 'h')) => (&text[..i], 3600),
            _ => (text, 1),
        };
        digits
            .parse::<u64>()
            .ok()
            .and_then(|n| n.checked_mul(scale))
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration {:?}", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Limits {
        #[serde(with = "duration_secs")]
        timeout: Duration,
    }

    #[test]
    fn test_serializes_as_seconds() {
        let limits = Limits {
            timeout: Duration::from_secs(90),
        };
        let rendered = toml::to_string(&limits).unwrap();
        assert_eq!(rendered.trim(), "timeout = 90");
    }

    #[test]
    fn test_accepts_integers_and_suffixes() {
        let cases = [
            ("timeout = 60", 60),
            ("timeout = \"45\"", 45),
            ("timeout = \"45s\"", 45),
            ("timeout = \"2m\"", 120),
            ("timeout = \"1h\"", 3600),
            ("timeout = \"off\"", 0),
        ];
        for (input, secs) in cases {
            let limits: Limits = toml::from_str(input).unwrap();
            assert_eq!(limits.timeout, Duration::from_secs(secs), "{}", input);
        }
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(toml::from_str::<Limits>("timeout = -1").is_err());
        assert!(toml::from_str::<Limits>("timeout = \"soon\"").is_err());
        assert!(toml::from_str::<Limits>("timeout = \"5d\"").is_err());
        assert!(duration_secs::parse("").is_err());
    }
}
