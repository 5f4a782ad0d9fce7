//! DPoP proofs as in [RFC9449](https://datatracker.ietf.org/doc/html/rfc9449).
//!
//! A DPoP proof is a JWT carrying the public key it can be verified with, signed over the
//! URL and HTTP method of the request being made. When an access token is bound to the
//! proof key, the proof additionally contains the `ath` member: the URL-safe-no-pad
//! base64 encoding of the SHA256 of the token.
//!
//! Servers may demand a server-provided nonce inside the proof. They signal this with an
//! `error` of `use_dpop_nonce` plus a `DPoP-Nonce` response header; the engine stores the
//! freshest nonce it has seen on any response and the caller retries the rejected request
//! exactly once with a regenerated proof.

use std::sync::{Arc, Mutex};

use oauth2::http::{header::HeaderValue, Method};
use oauth2::AccessToken;
use serde::{Deserialize, Serialize};
use serde_with::{
    base64::{Base64, UrlSafe},
    formats::Unpadded,
    serde_as, skip_serializing_none,
};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

use crate::{
    error::Error,
    http::{self, HttpClient, HttpRequest, HttpResponse},
    jose::{self, JwsSigner, KeyBinding},
    metadata::AuthorizationServerMetadata,
    types::DpopNonce,
};

pub const DPOP_HEADER_NAME: &str = "DPoP";
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DpopPayload {
    #[serde(rename = "htu")]
    http_url: Url,
    #[serde(rename = "htm")]
    http_method: String,
    #[serde(rename = "ath")]
    #[serde_as(as = "Option<Base64<UrlSafe, Unpadded>>")]
    access_token_hash: Option<Vec<u8>>,
    nonce: Option<String>,
    jti: String,
    iat: i64,
}

/// A signed DPoP proof, ready to be sent as the `DPoP` header.
#[derive(Clone, Debug)]
pub struct Dpop(String);

impl AsRef<str> for Dpop {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Dpop {
    pub(crate) fn header_value(&self) -> Result<HeaderValue, Error> {
        HeaderValue::from_str(&self.0).map_err(|e| Error::Validation {
            context: "DPoP header",
            reason: e.to_string(),
        })
    }
}

fn access_token_hash(token: &AccessToken) -> Vec<u8> {
    Sha256::digest(token.secret().as_bytes()).to_vec()
}

/// Per-binding DPoP state: the signer plus the nonce most recently supplied by the server.
///
/// One engine is bound to one issuer/authorization-server pairing. Sessions sharing the
/// binding share the engine; the nonce cell serializes their updates.
pub struct DpopEngine {
    signer: Arc<dyn JwsSigner>,
    nonce: Mutex<Option<DpopNonce>>,
}

impl DpopEngine {
    pub fn new(signer: Arc<dyn JwsSigner>) -> Self {
        Self {
            signer,
            nonce: Mutex::new(None),
        }
    }

    /// Require the signer's algorithm to be advertised by the authorization server.
    pub(crate) fn check_algorithm(
        &self,
        authorization_metadata: &AuthorizationServerMetadata,
    ) -> Result<(), Error> {
        let alg = self.signer.algorithm();
        match authorization_metadata.dpop_signing_alg_values_supported() {
            Some(supported) if supported.iter().any(|value| value == alg) => Ok(()),
            Some(_) => Err(Error::Validation {
                context: "DPoP signer",
                reason: format!("algorithm {alg} is not supported by the authorization server"),
            }),
            None => Err(Error::Validation {
                context: "DPoP signer",
                reason: "authorization server does not advertise DPoP support".to_string(),
            }),
        }
    }

    /// Build a proof for the given request, binding the current nonce if one is held.
    pub(crate) fn proof(
        &self,
        method: &Method,
        url: &Url,
        access_token: Option<&AccessToken>,
    ) -> Result<Dpop, Error> {
        // RFC 9449 §4.2: htu is the target URI without query and fragment parts.
        let mut http_url = url.clone();
        http_url.set_query(None);
        http_url.set_fragment(None);

        let payload = DpopPayload {
            http_url,
            http_method: method.to_string(),
            access_token_hash: access_token.map(access_token_hash),
            nonce: self.current_nonce().map(|nonce| nonce.as_ref().to_string()),
            jti: jose::random_token(),
            iat: OffsetDateTime::now_utc().unix_timestamp(),
        };

        let jwt = jose::sign_jwt(DPOP_JWT_TYPE, KeyBinding::Jwk, &payload, &*self.signer)?;
        Ok(Dpop(jwt))
    }

    pub(crate) fn current_nonce(&self) -> Option<DpopNonce> {
        self.nonce
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Restore a nonce persisted from an interrupted session.
    pub(crate) fn seed_nonce(&self, nonce: DpopNonce) {
        *self
            .nonce
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(nonce);
    }

    /// Record the `DPoP-Nonce` header of any response, success or failure alike.
    pub(crate) fn observe(&self, response: &HttpResponse) {
        if let Some(nonce) = http::dpop_nonce_header(response) {
            *self
                .nonce
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(nonce);
        }
    }
}

impl std::fmt::Debug for DpopEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DpopEngine")
            .field("algorithm", &self.signer.algorithm())
            .finish_non_exhaustive()
    }
}

/// Whether the response demands a fresh DPoP nonce.
pub(crate) fn is_nonce_rejection(response: &HttpResponse) -> bool {
    if response.status().is_success() {
        return false;
    }
    #[derive(Deserialize)]
    struct BareError {
        error: String,
    }
    let Ok(BareError { error }) = serde_json::from_slice::<BareError>(response.body()) else {
        return false;
    };
    error == "use_dpop_nonce"
        || (error == "invalid_dpop_proof" && http::dpop_nonce_header(response).is_some())
}

/// Send a request, transparently retrying exactly once when the server rejects the DPoP
/// proof for want of a fresh nonce. Every observed `DPoP-Nonce` header updates the
/// engine, including the one on the final response.
pub(crate) async fn send_with_nonce_retry<C, F>(
    http_client: &C,
    engine: Option<&DpopEngine>,
    method: Method,
    url: &Url,
    access_token: Option<&AccessToken>,
    build_request: F,
) -> Result<HttpResponse, Error>
where
    C: HttpClient,
    F: Fn(Option<&Dpop>) -> Result<HttpRequest, Error>,
{
    let Some(engine) = engine else {
        return Ok(http_client.execute(build_request(None)?).await?);
    };

    let proof = engine.proof(&method, url, access_token)?;
    let response = http_client.execute(build_request(Some(&proof))?).await?;
    engine.observe(&response);

    if !is_nonce_rejection(&response) || http::dpop_nonce_header(&response).is_none() {
        return Ok(response);
    }

    debug!("server demanded a DPoP nonce, retrying once with a fresh proof");
    let proof = engine.proof(&method, url, access_token)?;
    let response = http_client.execute(build_request(Some(&proof))?).await?;
    engine.observe(&response);

    // A second rejection is left in the response for the caller to surface as the
    // endpoint error it is; no further retries.
    Ok(response)
}
