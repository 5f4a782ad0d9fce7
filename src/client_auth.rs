//! Client authentication at the authorization server.
//!
//! Either a public client identified only by its `client_id`, or Attestation-Based Client
//! Authentication (draft-ietf-oauth-attestation-based-client-auth): a wallet attestation
//! JWT obtained from an external provider plus a proof-of-possession JWT signed with the
//! attested client key, sent as two dedicated headers. A client secret is never used.

use std::sync::Arc;

use oauth2::http::header::{HeaderName, HeaderValue};
use oauth2::ClientId;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::{
    error::{CryptoError, Error},
    jose::{self, JwsSigner, KeyBinding},
    types::IssuerUrl,
};

pub const CLIENT_ATTESTATION_HEADER_NAME: &str = "OAuth-Client-Attestation";
pub const CLIENT_ATTESTATION_POP_HEADER_NAME: &str = "OAuth-Client-Attestation-PoP";
pub const CLIENT_ATTESTATION_POP_JWT_TYPE: &str = "oauth-client-attestation-pop+jwt";

const POP_LIFETIME: Duration = Duration::minutes(5);

/// Contract for the collaborator that supplies the wallet attestation JWT.
///
/// How the attestation is obtained (and cached) is out of scope here; providers are
/// expected to hand out an attestation carrying the public half of the `pop_signer` key.
pub trait ClientAttestationProvider: Send + Sync {
    fn client_attestation(&self) -> Result<String, CryptoError>;
}

/// The client authentication method, fixed at configuration time.
#[derive(Clone)]
pub enum ClientAuth {
    /// Public client: only `client_id` accompanies authorization and token calls.
    Public { client_id: ClientId },
    /// Attestation-Based Client Authentication.
    Attested {
        client_id: ClientId,
        attestation_provider: Arc<dyn ClientAttestationProvider>,
        pop_signer: Arc<dyn JwsSigner>,
    },
}

#[derive(Serialize)]
struct ClientAttestationPopClaims<'a> {
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

impl ClientAuth {
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Public { client_id } | Self::Attested { client_id, .. } => client_id,
        }
    }

    /// Headers to attach to a token or pushed-authorization call. Empty for public
    /// clients.
    pub(crate) fn headers(
        &self,
        authorization_server: &IssuerUrl,
        challenge: Option<&str>,
    ) -> Result<Vec<(HeaderName, HeaderValue)>, Error> {
        let Self::Attested {
            client_id,
            attestation_provider,
            pop_signer,
        } = self
        else {
            return Ok(vec![]);
        };

        let attestation = attestation_provider.client_attestation()?;

        let now = OffsetDateTime::now_utc();
        let claims = ClientAttestationPopClaims {
            iss: client_id.as_str(),
            aud: authorization_server.as_str(),
            iat: now.unix_timestamp(),
            exp: (now + POP_LIFETIME).unix_timestamp(),
            jti: jose::random_token(),
            nonce: challenge,
        };
        let pop = jose::sign_jwt(
            CLIENT_ATTESTATION_POP_JWT_TYPE,
            KeyBinding::None,
            &claims,
            &**pop_signer,
        )?;

        Ok(vec![
            (
                HeaderName::from_static("oauth-client-attestation"),
                header_value(&attestation)?,
            ),
            (
                HeaderName::from_static("oauth-client-attestation-pop"),
                header_value(&pop)?,
            ),
        ])
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(|e| Error::Validation {
        context: "client attestation header",
        reason: e.to_string(),
    })
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public { client_id } => f
                .debug_struct("Public")
                .field("client_id", client_id)
                .finish(),
            Self::Attested { client_id, .. } => f
                .debug_struct("Attested")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}
