//! Typed ID definitions.

use crate::IdError;

// =============================================================================
// Devices
// =============================================================================

/// Identifier of one tracked device.
///
/// Device IDs come from fleet configuration (they match the ID flashed into
/// the device firmware), so unlike generated IDs they carry no prefix and no
/// embedded timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Maximum accepted length in characters.
    pub const MAX_LEN: usize = 64;

    /// Parses a device ID from a string.
    ///
    /// Accepts ASCII letters, digits, `_`, `-` and `.`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let len = s.chars().count();
        if len > Self::MAX_LEN {
            return Err(IdError::TooLong {
                len,
                max: Self::MAX_LEN,
            });
        }

        if let Some((position, found)) = s
            .chars()
            .enumerate()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(IdError::InvalidChar { found, position });
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for DeviceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_device_id_roundtrip() {
        let id: DeviceId = "box_01".parse().unwrap();
        assert_eq!(id.to_string(), "box_01");
        assert_eq!(id.as_str(), "box_01");
    }

    #[test]
    fn test_device_id_empty() {
        let result: Result<DeviceId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_device_id_rejects_path_separator() {
        let result: Result<DeviceId, _> = "box/01".parse();
        assert_eq!(
            result.unwrap_err(),
            IdError::InvalidChar {
                found: '/',
                position: 3
            }
        );
    }

    #[test]
    fn test_device_id_rejects_whitespace() {
        assert!(matches!(
            DeviceId::parse("box 01"),
            Err(IdError::InvalidChar { found: ' ', .. })
        ));
    }

    #[test]
    fn test_device_id_too_long() {
        let long = "a".repeat(DeviceId::MAX_LEN + 1);
        assert!(matches!(
            DeviceId::parse(&long),
            Err(IdError::TooLong { len: 65, max: 64 })
        ));
    }

    #[test]
    fn test_device_id_json_roundtrip() {
        let id = DeviceId::parse("cold-room.A3").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cold-room.A3\"");
        let parsed: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_device_id_json_rejects_invalid() {
        let result: Result<DeviceId, _> = serde_json::from_str("\"bad id\"");
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_ids_roundtrip(s in "[A-Za-z0-9_.-]{1,64}") {
            let id = DeviceId::parse(&s).unwrap();
            prop_assert_eq!(id.to_string(), s);
        }
    }
}
