//! Proofs of possession bound into credential requests.
//!
//! A `jwt` key proof is signed over `{typ: "openid4vci-proof+jwt", alg, jwk|kid}` with
//! claims `{iss: client_id, aud: credential issuer, iat, nonce: c_nonce}`. The `nonce`
//! claim carries the most recent `c_nonce` the issuer handed out and is consumed once
//! per issuance attempt.

use oauth2::ClientId;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::OffsetDateTime;

use crate::{
    error::Error,
    jose::{self, JwsSigner, KeyBinding},
    types::{CNonce, CredentialIssuerId},
};

pub const PROOF_JWT_TYPE: &str = "openid4vci-proof+jwt";

/// A single key proof, discriminated by `proof_type`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "proof_type", rename_all = "snake_case")]
pub enum Proof {
    Jwt { jwt: String },
}

/// Batch key proofs; one credential per proof is issued in response.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Proofs {
    pub jwt: Option<Vec<String>>,
}

#[skip_serializing_none]
#[derive(Serialize)]
struct ProofOfPossessionClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    nonce: Option<&'a str>,
}

/// Produce a `jwt` key proof over the current `c_nonce` through the given signer.
pub(crate) fn jwt_proof(
    signer: &dyn JwsSigner,
    client_id: &ClientId,
    audience: &CredentialIssuerId,
    c_nonce: Option<&CNonce>,
) -> Result<String, Error> {
    let claims = ProofOfPossessionClaims {
        iss: client_id.as_str(),
        aud: audience.as_str(),
        iat: OffsetDateTime::now_utc().unix_timestamp(),
        nonce: c_nonce.map(CNonce::nonce),
    };
    jose::sign_jwt(PROOF_JWT_TYPE, KeyBinding::Jwk, &claims, signer)
}

/// An entry of a configuration's `proof_types_supported` map.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct KeyProofTypesSupported {
    #[serde(rename = "$key$")]
    name: KeyProofType,
    proof_signing_alg_values_supported: Vec<String>,
}

impl KeyProofTypesSupported {
    pub fn new(name: KeyProofType, proof_signing_alg_values_supported: Vec<String>) -> Self {
        Self {
            name,
            proof_signing_alg_values_supported,
        }
    }

    field_getters_setters![
        pub self [self] ["supported proof type value"] {
            set_name -> name[KeyProofType],
            set_proof_signing_alg_values_supported -> proof_signing_alg_values_supported[Vec<String>],
        }
    ];
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyProofType {
    Jwt,
    Cwt,
    #[serde(untagged)]
    Extension(String),
}

/// The signing algorithms a configuration accepts for `jwt` proofs, when declared.
pub(crate) fn jwt_proof_algorithms(
    proof_types: Option<&Vec<KeyProofTypesSupported>>,
) -> Option<&[String]> {
    proof_types?
        .iter()
        .find(|entry| entry.name == KeyProofType::Jwt)
        .map(|entry| entry.proof_signing_alg_values_supported.as_slice())
}
