//! Error handling module for the NumGate Provider Engine
//!
//! Errors fall into five families: configuration, transport, provider business
//! errors, parse failures and open circuits. Callers route on
//! [`EngineError::category`] and, for business errors, on the predicates of the
//! wrapped [`ProviderError`].

use crate::classifier::ProviderError;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error families used for routing decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Transport,
    Business,
    Parse,
    CircuitOpen,
    Infrastructure,
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Endpoint not declared for the provider
    #[error("Provider {provider} has no endpoint '{endpoint}'")]
    MissingEndpoint { provider: String, endpoint: String },

    /// Transport failures left after retries are exhausted
    #[error("Transport error for {provider} after {attempts} attempt(s): {message}")]
    Transport {
        provider: String,
        status_code: Option<u16>,
        attempts: u32,
        message: String,
    },

    /// Timeout errors
    #[error("Request to {provider} timed out after {seconds} seconds")]
    Timeout { provider: String, seconds: u64 },

    /// Circuit breaker errors
    #[error("Circuit breaker open for {provider}")]
    CircuitOpen { provider: String },

    /// Classified provider business error
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Required canonical fields missing after mapping
    #[error("Parse error for {provider}/{endpoint}: {message}")]
    Parse {
        provider: String,
        endpoint: String,
        message: String,
        raw: String,
    },

    /// Price conversion errors
    #[error("Pricing error: {message}")]
    Pricing { message: String },

    /// Credential decryption errors
    #[error("Decryption error: {message}")]
    Decryption { message: String },

    /// Webhook verification or parsing errors
    #[error("Webhook error: {message}")]
    Webhook { message: String },

    /// Redis operation errors
    #[error("Redis error: {source}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    /// Database operation errors
    #[error("Database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    /// HTTP client errors
    #[error("HTTP client error: {source}")]
    HttpClient {
        #[from]
        source: reqwest::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// Not found errors
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new missing endpoint error
    pub fn missing_endpoint<S1: Into<String>, S2: Into<String>>(provider: S1, endpoint: S2) -> Self {
        Self::MissingEndpoint {
            provider: provider.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S1: Into<String>, S2: Into<String>>(
        provider: S1,
        status_code: Option<u16>,
        attempts: u32,
        message: S2,
    ) -> Self {
        Self::Transport {
            provider: provider.into(),
            status_code,
            attempts,
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(provider: S, seconds: u64) -> Self {
        Self::Timeout {
            provider: provider.into(),
            seconds,
        }
    }

    /// Create a new circuit open error
    pub fn circuit_open<S: Into<String>>(provider: S) -> Self {
        Self::CircuitOpen {
            provider: provider.into(),
        }
    }

    /// Create a new parse error carrying the raw response
    pub fn parse<S1, S2, S3, S4>(provider: S1, endpoint: S2, message: S3, raw: S4) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
        S4: Into<String>,
    {
        Self::Parse {
            provider: provider.into(),
            endpoint: endpoint.into(),
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Create a new pricing error
    pub fn pricing<S: Into<String>>(message: S) -> Self {
        Self::Pricing {
            message: message.into(),
        }
    }

    /// Create a new decryption error
    pub fn decryption<S: Into<String>>(message: S) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }

    /// Create a new webhook error
    pub fn webhook<S: Into<String>>(message: S) -> Self {
        Self::Webhook {
            message: message.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Error family, used by callers to choose between fallback and retry
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Configuration { .. } | EngineError::MissingEndpoint { .. } => {
                ErrorCategory::Configuration
            }
            EngineError::Transport { .. } | EngineError::Timeout { .. } => ErrorCategory::Transport,
            EngineError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            EngineError::Provider(_) => ErrorCategory::Business,
            EngineError::Parse { .. } => ErrorCategory::Parse,
            EngineError::Pricing { .. }
            | EngineError::Decryption { .. }
            | EngineError::Webhook { .. }
            | EngineError::Redis { .. }
            | EngineError::Database { .. }
            | EngineError::HttpClient { .. }
            | EngineError::Serialization { .. }
            | EngineError::NotFound { .. }
            | EngineError::Internal { .. } => ErrorCategory::Infrastructure,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Configuration { .. } => "CONFIGURATION_ERROR",
            EngineError::MissingEndpoint { .. } => "MISSING_ENDPOINT",
            EngineError::Transport { .. } => "TRANSPORT_ERROR",
            EngineError::Timeout { .. } => "TIMEOUT",
            EngineError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            EngineError::Provider(err) => err.kind.as_str(),
            EngineError::Parse { .. } => "PARSE_ERROR",
            EngineError::Pricing { .. } => "PRICING_ERROR",
            EngineError::Decryption { .. } => "DECRYPTION_ERROR",
            EngineError::Webhook { .. } => "WEBHOOK_ERROR",
            EngineError::Redis { .. } => "CACHE_ERROR",
            EngineError::Database { .. } => "DATABASE_ERROR",
            EngineError::HttpClient { .. } => "HTTP_CLIENT_ERROR",
            EngineError::Serialization { .. } => "SERIALIZATION_ERROR",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is worth retrying from the caller's side
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { .. }
            | EngineError::Timeout { .. }
            | EngineError::Redis { .. }
            | EngineError::HttpClient { .. } => true,
            EngineError::Provider(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Whether the failure counts against the provider's circuit breaker
    pub fn affects_health(&self) -> bool {
        match self {
            EngineError::Transport { .. } | EngineError::Timeout { .. } => true,
            EngineError::Provider(err) => err.affects_health(),
            _ => false,
        }
    }

    /// Borrow the business error, if this is one
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            EngineError::Provider(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numgate_shared::UniversalErrorKind;

    #[test]
    fn test_error_creation() {
        let error = EngineError::configuration("missing mapping");
        assert_eq!(error.to_string(), "Configuration error: missing mapping");
        assert_eq!(error.error_code(), "CONFIGURATION_ERROR");
        assert_eq!(error.category(), ErrorCategory::Configuration);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_circuit_open_is_distinct_from_transport() {
        let open = EngineError::circuit_open("smshub");
        let transport = EngineError::transport("smshub", Some(502), 3, "bad gateway");
        assert_eq!(open.category(), ErrorCategory::CircuitOpen);
        assert_eq!(transport.category(), ErrorCategory::Transport);
        assert!(!open.is_retryable());
        assert!(transport.is_retryable());
    }

    #[test]
    fn test_provider_error_predicates_pass_through() {
        let error: EngineError =
            ProviderError::new("smshub", UniversalErrorKind::NoNumbers, "NO_NUMBERS").into();
        assert_eq!(error.category(), ErrorCategory::Business);
        assert_eq!(error.error_code(), "NO_NUMBERS");
        assert!(error.is_retryable());
        assert_eq!(
            error.provider_error().map(|e| e.kind),
            Some(UniversalErrorKind::NoNumbers)
        );

        let permanent: EngineError =
            ProviderError::new("smshub", UniversalErrorKind::BadKey, "BAD_KEY").into();
        assert!(!permanent.is_retryable());
        assert!(!permanent.affects_health());

        let expired: EngineError =
            ProviderError::new("smshub", UniversalErrorKind::ActivationExpired, "STATUS_EXPIRED")
                .into();
        assert!(!expired.affects_health());

        let server: EngineError =
            ProviderError::new("smshub", UniversalErrorKind::ServerError, "ERROR_SQL").into();
        assert!(server.affects_health());
    }

    #[test]
    fn test_parse_error_keeps_raw_response() {
        let error = EngineError::parse("p", "getNumber", "missing phoneNumber", "{\"id\":1}");
        match error {
            EngineError::Parse { raw, .. } => assert_eq!(raw, "{\"id\":1}"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
