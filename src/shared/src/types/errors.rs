//! Universal provider error taxonomy
//!
//! Every provider-specific error string a configuration declares is mapped to
//! one of these kinds. Callers branch on the derived predicates rather than on
//! the raw provider text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UniversalErrorKind {
    NoNumbers,
    NoBalance,
    BadKey,
    BadService,
    BadCountry,
    NoActivation,
    ActivationExpired,
    ActivationCancelled,
    RateLimited,
    ServerError,
    Waiting,
    Received,
    #[serde(other)]
    UnknownError,
}

impl UniversalErrorKind {
    pub const ALL: [UniversalErrorKind; 13] = [
        UniversalErrorKind::NoNumbers,
        UniversalErrorKind::NoBalance,
        UniversalErrorKind::BadKey,
        UniversalErrorKind::BadService,
        UniversalErrorKind::BadCountry,
        UniversalErrorKind::NoActivation,
        UniversalErrorKind::ActivationExpired,
        UniversalErrorKind::ActivationCancelled,
        UniversalErrorKind::RateLimited,
        UniversalErrorKind::ServerError,
        UniversalErrorKind::Waiting,
        UniversalErrorKind::Received,
        UniversalErrorKind::UnknownError,
    ];

    /// The same request may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UniversalErrorKind::NoNumbers
                | UniversalErrorKind::RateLimited
                | UniversalErrorKind::ServerError
        )
    }

    /// Repeating the request cannot succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            UniversalErrorKind::BadKey
                | UniversalErrorKind::BadService
                | UniversalErrorKind::BadCountry
                | UniversalErrorKind::NoActivation
                | UniversalErrorKind::ActivationExpired
        )
    }

    /// Normal end of an activation's life; never a provider fault
    pub fn is_lifecycle_terminal(&self) -> bool {
        matches!(
            self,
            UniversalErrorKind::NoActivation
                | UniversalErrorKind::ActivationExpired
                | UniversalErrorKind::ActivationCancelled
        )
    }

    /// Whether an occurrence should count against the provider's health
    pub fn affects_health(&self) -> bool {
        matches!(self, UniversalErrorKind::ServerError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UniversalErrorKind::NoNumbers => "NO_NUMBERS",
            UniversalErrorKind::NoBalance => "NO_BALANCE",
            UniversalErrorKind::BadKey => "BAD_KEY",
            UniversalErrorKind::BadService => "BAD_SERVICE",
            UniversalErrorKind::BadCountry => "BAD_COUNTRY",
            UniversalErrorKind::NoActivation => "NO_ACTIVATION",
            UniversalErrorKind::ActivationExpired => "ACTIVATION_EXPIRED",
            UniversalErrorKind::ActivationCancelled => "ACTIVATION_CANCELLED",
            UniversalErrorKind::RateLimited => "RATE_LIMITED",
            UniversalErrorKind::ServerError => "SERVER_ERROR",
            UniversalErrorKind::Waiting => "WAITING",
            UniversalErrorKind::Received => "RECEIVED",
            UniversalErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for UniversalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UniversalErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("Invalid error kind: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(UniversalErrorKind::NoNumbers.is_retryable());
        assert!(UniversalErrorKind::RateLimited.is_retryable());
        assert!(!UniversalErrorKind::BadKey.is_retryable());

        assert!(UniversalErrorKind::BadCountry.is_permanent());
        assert!(UniversalErrorKind::ActivationExpired.is_permanent());
        assert!(!UniversalErrorKind::ActivationCancelled.is_permanent());

        assert!(UniversalErrorKind::ActivationCancelled.is_lifecycle_terminal());
        assert!(UniversalErrorKind::NoActivation.is_lifecycle_terminal());
        assert!(!UniversalErrorKind::ServerError.is_lifecycle_terminal());
    }

    #[test]
    fn test_lifecycle_terminal_never_affects_health() {
        for kind in UniversalErrorKind::ALL {
            if kind.is_lifecycle_terminal() {
                assert!(!kind.affects_health(), "{} must not affect health", kind);
            }
        }
    }

    #[test]
    fn test_serde_names() {
        let kind: UniversalErrorKind = serde_json::from_str("\"ACTIVATION_CANCELLED\"").unwrap();
        assert_eq!(kind, UniversalErrorKind::ActivationCancelled);

        let unknown: UniversalErrorKind = serde_json::from_str("\"SOMETHING_ELSE\"").unwrap();
        assert_eq!(unknown, UniversalErrorKind::UnknownError);

        assert_eq!(
            serde_json::to_string(&UniversalErrorKind::NoNumbers).unwrap(),
            "\"NO_NUMBERS\""
        );
    }

    #[test]
    fn test_from_str_round_trip() {
        for kind in UniversalErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<UniversalErrorKind>().unwrap(), kind);
        }
        assert_eq!(
            " bad_key ".parse::<UniversalErrorKind>().unwrap(),
            UniversalErrorKind::BadKey
        );
    }
}
