//! Pairing credential with redacted Debug/Display output.

use crate::{ErrorLocation, TokenError};

use std::fmt;
use std::panic::Location;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Number of leading characters shown by [`PairingToken::fingerprint`].
const FINGERPRINT_LEN: usize = 4;

/// Credential proving the relay may open a privileged connection to the node.
///
/// The token is persisted by the config store, so unlike most secrets it
/// serializes as a plain string. It never shows up in `Debug` or `Display`
/// output.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingToken {
    inner: String,
}

impl PairingToken {
    /// Parse a token delivered by the pairing UI.
    ///
    /// Surrounding whitespace is trimmed. Tokens containing whitespace or
    /// control characters are rejected since they end up in an HTTP header.
    #[track_caller]
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(TokenError::Empty {
                message: String::from("pairing token is empty"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(TokenError::Invalid {
                message: String::from("pairing token contains whitespace or control characters"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(Self {
            inner: trimmed.to_string(),
        })
    }

    /// Get the raw token for transmission to the node.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Short prefix that is safe to log for correlation.
    pub fn fingerprint(&self) -> String {
        let prefix: String = self.inner.chars().take(FINGERPRINT_LEN).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingToken([REDACTED])")
    }
}

impl fmt::Display for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED TOKEN]")
    }
}

impl Drop for PairingToken {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl Serialize for PairingToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.inner)
    }
}

impl<'de> Deserialize<'de> for PairingToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        PairingToken::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::PairingToken;

    #[test]
    fn given_token_when_debug_formatted_then_value_is_hidden() {
        let token = PairingToken::parse("abcd-efgh-ijkl").unwrap();

        let debug = format!("{token:?}");
        let display = format!("{token}");

        assert!(!debug.contains("abcd-efgh"));
        assert!(!display.contains("abcd-efgh"));
        assert_eq!(token.fingerprint(), "abcd…");
    }

    #[test]
    fn given_padded_token_when_parsed_then_trimmed() {
        let token = PairingToken::parse("  tok3n \n").unwrap();

        assert_eq!(token.as_str(), "tok3n");
    }

    #[test]
    fn given_blank_or_spaced_token_when_parsed_then_rejected() {
        assert!(PairingToken::parse("   ").is_err());
        assert!(PairingToken::parse("two words").is_err());
    }

    #[test]
    fn given_token_when_serialized_then_round_trips_as_plain_string() {
        let token = PairingToken::parse("tok3n").unwrap();

        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"tok3n\"");

        let back: PairingToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
