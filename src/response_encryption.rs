//! Credential response encryption.
//!
//! The wallet sends an ephemeral JWK plus the selected JWE `alg`/`enc` in the credential
//! request; the issuer replies with a JWE the matching private key decrypts. Key
//! generation and decryption live behind pluggable collaborators: the private key never
//! enters this crate, must never be logged, and is expected to be zeroized by the
//! provider once the response has been decrypted.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use ssi_jwk::JWK;

use crate::error::{CryptoError, Error};

/// The issuer's `credential_response_encryption` metadata.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialResponseEncryptionMetadata {
    alg_values_supported: Vec<String>,
    enc_values_supported: Vec<String>,
    #[serde(default)]
    encryption_required: bool,
}

impl CredentialResponseEncryptionMetadata {
    pub fn new(
        alg_values_supported: Vec<String>,
        enc_values_supported: Vec<String>,
        encryption_required: bool,
    ) -> Self {
        Self {
            alg_values_supported,
            enc_values_supported,
            encryption_required,
        }
    }

    field_getters_setters![
        pub self [self] ["credential response encryption metadata value"] {
            set_alg_values_supported -> alg_values_supported[Vec<String>],
            set_enc_values_supported -> enc_values_supported[Vec<String>],
        }
    ];

    pub fn encryption_required(&self) -> bool {
        self.encryption_required
    }
}

/// The `credential_response_encryption` member of a credential request.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialResponseEncryption {
    jwk: JWK,
    alg: String,
    enc: String,
}

impl CredentialResponseEncryption {
    field_getters_setters![
        pub self [self] ["credential response encryption value"] {
            set_jwk -> jwk[JWK],
            set_alg -> alg[String],
            set_enc -> enc[String],
        }
    ];
}

/// Decrypts a compact JWE with the private half of an ephemeral response-encryption key.
pub trait JweDecrypter: Send + Sync {
    fn decrypt(&self, compact_jwe: &str) -> Result<Vec<u8>, CryptoError>;
}

/// Produces ephemeral response-encryption material acceptable to the given issuer.
pub trait ResponseEncryptionProvider: Send + Sync {
    fn generate(
        &self,
        metadata: &CredentialResponseEncryptionMetadata,
    ) -> Result<ResponseEncryption, CryptoError>;
}

/// One-shot response-encryption material: the public parameters sent to the issuer and
/// the handle that decrypts the reply.
pub struct ResponseEncryption {
    pub jwk: JWK,
    pub alg: String,
    pub enc: String,
    pub decrypter: Box<dyn JweDecrypter>,
}

impl ResponseEncryption {
    /// Refuse algorithms the issuer did not advertise.
    pub(crate) fn check_against(
        &self,
        metadata: &CredentialResponseEncryptionMetadata,
    ) -> Result<(), Error> {
        if !metadata.alg_values_supported().contains(&self.alg) {
            return Err(Error::Crypto(CryptoError::UnsupportedAlgorithm(
                self.alg.clone(),
            )));
        }
        if !metadata.enc_values_supported().contains(&self.enc) {
            return Err(Error::Crypto(CryptoError::UnsupportedAlgorithm(
                self.enc.clone(),
            )));
        }
        Ok(())
    }

    pub(crate) fn request_parameters(&self) -> CredentialResponseEncryption {
        CredentialResponseEncryption {
            jwk: self.jwk.to_public(),
            alg: self.alg.clone(),
            enc: self.enc.clone(),
        }
    }
}

impl std::fmt::Debug for ResponseEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The JWK handed out by providers is public, but keep it out of logs anyway.
        f.debug_struct("ResponseEncryption")
            .field("alg", &self.alg)
            .field("enc", &self.enc)
            .finish_non_exhaustive()
    }
}
