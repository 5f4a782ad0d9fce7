use oauth2::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use url::Url;

/// Failures of the pluggable HTTP transport, plus malformed bodies and non-protocol
/// status codes observed on otherwise successful exchanges.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: StatusCode, body: Vec<u8> },
    #[error("malformed response body: {0}")]
    Decode(#[source] serde_path_to_error::Error<serde_json::Error>),
}

/// Failures of the pluggable JOSE collaborators.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("signing failed: {0}")]
    Signing(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("signature verification failed: {0}")]
    Verification(String),
    #[error("decryption failed: {0}")]
    Decryption(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid {context}: {reason}")]
    Validation {
        context: &'static str,
        reason: String,
    },
    #[error("invalid issuer metadata: {reason}")]
    MetadataInvalid { reason: String },
    #[error("invalid credential offer: {reason}")]
    OfferInvalid { reason: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("authorization server returned {}", .0.error)]
    TokenEndpoint(Box<ErrorResponse<TokenErrorCode>>),
    #[error("credential issuer returned {}", .0.error)]
    CredentialEndpoint(Box<ErrorResponse<CredentialErrorCode>>),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
}

/// OAuth 2.0 error document as returned by the authorization server or the credential
/// issuer ([RFC6749](https://www.rfc-editor.org/rfc/rfc6749.html#section-5.2)).
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ErrorResponse<C> {
    pub error: C,
    pub error_description: Option<String>,
    pub error_uri: Option<Url>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,
    AuthorizationPending,
    SlowDown,
    UseDpopNonce,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for TokenErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::UseDpopNonce => "use_dpop_nonce",
            Self::Other(code) => code,
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialErrorCode {
    InvalidCredentialRequest,
    UnsupportedCredentialType,
    UnsupportedCredentialFormat,
    InvalidProof,
    InvalidNonce,
    InvalidEncryptionParameters,
    InvalidTransactionId,
    IssuancePending,
    InvalidToken,
    InvalidNotificationId,
    InvalidNotificationRequest,
    UseDpopNonce,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for CredentialErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::InvalidCredentialRequest => "invalid_credential_request",
            Self::UnsupportedCredentialType => "unsupported_credential_type",
            Self::UnsupportedCredentialFormat => "unsupported_credential_format",
            Self::InvalidProof => "invalid_proof",
            Self::InvalidNonce => "invalid_nonce",
            Self::InvalidEncryptionParameters => "invalid_encryption_parameters",
            Self::InvalidTransactionId => "invalid_transaction_id",
            Self::IssuancePending => "issuance_pending",
            Self::InvalidToken => "invalid_token",
            Self::InvalidNotificationId => "invalid_notification_id",
            Self::InvalidNotificationRequest => "invalid_notification_request",
            Self::UseDpopNonce => "use_dpop_nonce",
            Self::Other(code) => code,
        })
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn example_token_error_response() {
        let response: ErrorResponse<TokenErrorCode> = serde_json::from_value(json!({
            "error": "invalid_grant",
            "error_description": "The pre-authorized code has expired"
        }))
        .unwrap();
        assert_eq!(response.error, TokenErrorCode::InvalidGrant);
    }

    #[test]
    fn unknown_error_codes_are_preserved() {
        let response: ErrorResponse<CredentialErrorCode> = serde_json::from_value(json!({
            "error": "vendor_specific_failure"
        }))
        .unwrap();
        assert_eq!(
            response.error,
            CredentialErrorCode::Other("vendor_specific_failure".to_string())
        );
        assert_eq!(response.error.to_string(), "vendor_specific_failure");
    }

    #[test]
    fn use_dpop_nonce_is_recognized() {
        let response: ErrorResponse<TokenErrorCode> = serde_json::from_value(json!({
            "error": "use_dpop_nonce",
            "error_description": "Authorization server requires nonce in DPoP proof"
        }))
        .unwrap();
        assert_eq!(response.error, TokenErrorCode::UseDpopNonce);
    }
}
