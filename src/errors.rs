//! Error taxonomy for the Argus licensing runtime.
//!
//! One `thiserror` enum per concern in the spec (`ApiError`, `LicenseError`,
//! `ConfigurationError`, `CryptoError`), plus an infrastructure-level
//! `StorageError` for cache I/O, composed into a single top-level [`Error`]
//! via `#[from]` so call sites can use `?` regardless of which layer failed.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP-adapter level failure, classified by status per §4.3.
#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("client error ({status_code}){}: {message}", code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    ClientError {
        status_code: u16,
        code: Option<String>,
        message: String,
        response_body: Option<String>,
    },

    #[error("server error ({status_code}){}: {message}", code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    ServerError {
        status_code: u16,
        code: Option<String>,
        message: String,
        response_body: Option<String>,
    },

    #[error("malformed response body: {message}")]
    DecodingError { message: String },
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NetworkError { .. } => 0,
            ApiError::ClientError { status_code, .. } => *status_code,
            ApiError::ServerError { status_code, .. } => *status_code,
            ApiError::DecodingError { .. } => 200,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::ClientError { code, .. } | ApiError::ServerError { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::NetworkError { .. })
    }

    pub fn is_client(&self) -> bool {
        matches!(self, ApiError::ClientError { .. })
    }

    pub fn is_server(&self) -> bool {
        matches!(self, ApiError::ServerError { .. })
    }

    /// Status classification the API Adapter retries on: network errors and
    /// {408, 429, 502, 503, 504}.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status_code(), 0 | 408 | 429 | 502 | 503 | 504)
    }
}

/// Licensing-domain failure: the cache/state disagree with what the caller asked for.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LicenseError {
    #[error("no license is cached for this device")]
    NoLicense,
    #[error("the cached license failed validation")]
    InvalidLicense,
    #[error("the license has expired")]
    Expired,
    #[error("the license has been revoked")]
    Revoked,
}

/// Malformed or incomplete runtime configuration.
#[derive(Debug, Error, Clone)]
pub enum ConfigurationError {
    #[error("missing api key")]
    MissingApiKey,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Cryptographic verification failure, produced by the Offline Verifier.
#[derive(Debug, Error, Clone)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("no public key pinned for key_id {0}")]
    NoPublicKey(String),
    #[error("clock tamper detected")]
    ClockTamper,
    #[error("crypto library error: {0}")]
    VerificationError(String),
    #[error("encryption failed: {0}")]
    EncryptionError(String),
    #[error("decryption failed: {0}")]
    DecryptionError(String),
}

/// Cache/storage-layer I/O failure. Infrastructure concern, not named in the
/// formal taxonomy but needed so storage call sites can propagate with `?`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no app data directory available for this platform")]
    NoDataDir,
}

impl Clone for StorageError {
    fn clone(&self) -> Self {
        match self {
            StorageError::Io(e) => StorageError::Io(std::io::Error::new(e.kind(), e.to_string())),
            StorageError::Json(e) => StorageError::Json(serde_json::Error::io(
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
            )),
            StorageError::NoDataDir => StorageError::NoDataDir,
        }
    }
}

/// Top-level error returned by the Session Core's public surface.
#[derive(Debug, Error, Clone)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    License(#[from] LicenseError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("session core has been disposed")]
    Disposed,
}

impl Error {
    /// Best-effort machine-readable reason code, used both for logging and for
    /// the `reason_code` surfaced on a failed `ValidationResult`.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::Api(ApiError::NetworkError { .. }) => "network_error",
            Error::Api(ApiError::ClientError { .. }) => "client_error",
            Error::Api(ApiError::ServerError { .. }) => "server_error",
            Error::Api(ApiError::DecodingError { .. }) => "decoding_error",
            Error::License(LicenseError::NoLicense) => "no_license",
            Error::License(LicenseError::InvalidLicense) => "invalid_license",
            Error::License(LicenseError::Expired) => "expired",
            Error::License(LicenseError::Revoked) => "revoked",
            Error::Configuration(ConfigurationError::MissingApiKey) => "missing_api_key",
            Error::Configuration(ConfigurationError::InvalidConfiguration(_)) => {
                "invalid_configuration"
            }
            Error::Crypto(CryptoError::InvalidKey(_)) => "invalid_key",
            Error::Crypto(CryptoError::InvalidSignature(_)) => "invalid_signature",
            Error::Crypto(CryptoError::SignatureInvalid) => "signature_invalid",
            Error::Crypto(CryptoError::NoPublicKey(_)) => "no_public_key",
            Error::Crypto(CryptoError::ClockTamper) => "clock_tamper",
            Error::Crypto(CryptoError::VerificationError(_)) => "crypto_error",
            Error::Crypto(CryptoError::EncryptionError(_)) => "encryption_error",
            Error::Crypto(CryptoError::DecryptionError(_)) => "decryption_error",
            Error::Storage(_) => "storage_error",
            Error::Cancelled => "cancelled",
            Error::Disposed => "disposed",
        }
    }

    /// True for the handful of transport failures the API Adapter retries on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Api(e) if e.is_retryable())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(StorageError::Json(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(StorageError::Io(e))
    }
}
