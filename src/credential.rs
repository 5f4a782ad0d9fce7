//! Credential, deferred-credential and notification endpoint messages, and the outcomes
//! the requester reports back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::{
    error::{CredentialErrorCode, ErrorResponse},
    profiles::ClaimSet,
    proof_of_possession::{Proof, Proofs},
    response_encryption::CredentialResponseEncryption,
    types::{CNonce, CredentialConfigurationId, NotificationId, TransactionId},
};

/// What to request issuance of.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum IssuanceRequestPayload {
    /// Request by credential configuration id, optionally narrowing the claims.
    ConfigurationBased {
        credential_configuration_id: CredentialConfigurationId,
        claim_set: Option<ClaimSet>,
    },
    /// Request by `credential_identifier` from the token response's
    /// `authorization_details`. Declared unsupported by this client.
    IdentifierBased {
        credential_configuration_id: CredentialConfigurationId,
        credential_identifier: String,
    },
}

/// Credential request body. Exactly one of `proof` and `proofs` may be present.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialRequest {
    pub credential_configuration_id: Option<CredentialConfigurationId>,
    pub claims: Option<Value>,
    pub proof: Option<Proof>,
    pub proofs: Option<Proofs>,
    pub credential_response_encryption: Option<CredentialResponseEncryption>,
}

/// Credential endpoint success body (HTTP 200), covering immediate and deferred
/// issuance.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialResponse {
    pub credential: Option<Value>,
    pub credentials: Option<Vec<IssuedCredential>>,
    pub transaction_id: Option<TransactionId>,
    pub notification_id: Option<NotificationId>,
    pub c_nonce: Option<String>,
    pub c_nonce_expires_in: Option<u64>,
}

impl CredentialResponse {
    /// All issued credentials, normalizing the single-`credential` member into the
    /// batch representation.
    pub(crate) fn issued_credentials(&self) -> Vec<IssuedCredential> {
        match (&self.credentials, &self.credential) {
            (Some(credentials), _) => credentials.clone(),
            (None, Some(credential)) => vec![IssuedCredential::Bare(credential.clone())],
            (None, None) => vec![],
        }
    }
}

/// One issued credential. Draft 15 wraps each in an object with a `credential` member;
/// older issuers inline the bare value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IssuedCredential {
    Object { credential: Value },
    Bare(Value),
}

impl IssuedCredential {
    pub fn value(&self) -> &Value {
        match self {
            Self::Object { credential } => credential,
            Self::Bare(credential) => credential,
        }
    }
}

/// Credential endpoint error body; `invalid_proof` rejections carry a fresh nonce.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialErrorResponse {
    #[serde(flatten)]
    pub error: ErrorResponse<CredentialErrorCode>,
    pub c_nonce: Option<String>,
    pub c_nonce_expires_in: Option<u64>,
    pub interval: Option<u64>,
}

/// Outcome of one credential request.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// Credentials were issued.
    Success {
        credentials: Vec<IssuedCredential>,
        notification_id: Option<NotificationId>,
    },
    /// Issuance continues asynchronously; poll the deferred endpoint.
    Deferred { transaction_id: TransactionId },
    /// The issuer rejected the proof and supplied a fresh nonce to re-sign over. The
    /// returned state already holds that nonce; re-sign and retry.
    InvalidProof {
        c_nonce: CNonce,
        description: Option<String>,
    },
    /// Terminal protocol failure reported by the issuer.
    Failed {
        error: ErrorResponse<CredentialErrorCode>,
    },
}

/// Deferred endpoint request body.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeferredCredentialRequest {
    pub transaction_id: TransactionId,
}

/// Outcome of polling the deferred endpoint.
#[derive(Debug)]
pub enum DeferredOutcome {
    Issued {
        credentials: Vec<IssuedCredential>,
        notification_id: Option<NotificationId>,
    },
    /// Not ready yet; retry no sooner than `interval` seconds when given.
    IssuancePending { interval: Option<u64> },
    Failed {
        error: ErrorResponse<CredentialErrorCode>,
    },
}
