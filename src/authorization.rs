//! Authorization-flow state values.
//!
//! The flow is a chain of consuming transitions:
//! [`PreparedAuthorizationRequest`] → [`BoundAuthorizationCode`] → [`AuthorizedRequest`].
//! Each step moves its predecessor, so a PKCE verifier or authorization code cannot be
//! replayed into a second exchange. All states serialize, so an interrupted flow can be
//! persisted and resumed by the caller.

use std::time::Duration;

use oauth2::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use oauth2::{AccessToken, AuthorizationCode, CsrfToken, PkceCodeVerifier, RefreshToken};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use url::Url;

use crate::{
    error::Error,
    token::{TokenResponse, TokenType},
    types::{CNonce, CredentialConfigurationId},
};

/// A Rich Authorization Request entry of type `openid_credential`, referencing a
/// credential configuration. Format-specialized shapes are deliberately not produced;
/// members a server adds on echo are carried verbatim.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AuthorizationDetail {
    r#type: AuthorizationDetailType,
    credential_configuration_id: CredentialConfigurationId,
    #[serde(flatten)]
    additional_fields: Map<String, Value>,
}

impl AuthorizationDetail {
    pub fn new(credential_configuration_id: CredentialConfigurationId) -> Self {
        Self {
            r#type: AuthorizationDetailType::OpenidCredential,
            credential_configuration_id,
            additional_fields: Map::new(),
        }
    }

    pub fn credential_configuration_id(&self) -> &CredentialConfigurationId {
        &self.credential_configuration_id
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationDetailType {
    OpenidCredential,
}

/// Query/form parameters of the front-channel authorization request, also pushed to the
/// PAR endpoint when one is used.
#[skip_serializing_none]
#[derive(Serialize)]
pub(crate) struct AuthorizationRequestParameters<'a> {
    pub response_type: &'static str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub state: &'a str,
    pub code_challenge: &'a str,
    pub code_challenge_method: &'static str,
    pub scope: Option<String>,
    /// JSON-encoded, as required for URL and form transport.
    pub authorization_details: Option<String>,
    pub issuer_state: Option<&'a str>,
}

/// `request_uri` handed out by the PAR endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ParRequestUri(String);

impl ParRequestUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PushedAuthorizationResponse {
    pub request_uri: ParRequestUri,
    pub expires_in: u64,
}

/// An authorization request ready to be presented to the user's agent.
///
/// Holds the PKCE verifier and `state` that the redirect back must be checked against;
/// both are consumed exactly once by [`PreparedAuthorizationRequest::bind_code`].
#[derive(Debug, Deserialize, Serialize)]
pub struct PreparedAuthorizationRequest {
    pub(crate) authorization_url: Url,
    pub(crate) request_uri: Option<ParRequestUri>,
    pub(crate) state: CsrfToken,
    pub(crate) pkce_verifier: PkceCodeVerifier,
    pub(crate) configuration_ids: Vec<CredentialConfigurationId>,
}

impl PreparedAuthorizationRequest {
    /// The URL to open in the user's agent.
    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }

    /// The `request_uri` obtained through PAR, when one was pushed.
    pub fn request_uri(&self) -> Option<&ParRequestUri> {
        self.request_uri.as_ref()
    }

    pub fn state(&self) -> &CsrfToken {
        &self.state
    }

    pub fn configuration_ids(&self) -> &[CredentialConfigurationId] {
        &self.configuration_ids
    }

    /// Pair the authorization code from the redirect with the held PKCE verifier,
    /// after checking the returned `state`.
    pub fn bind_code(
        self,
        code: AuthorizationCode,
        returned_state: &CsrfToken,
    ) -> Result<BoundAuthorizationCode, Error> {
        if *returned_state != self.state {
            return Err(Error::Validation {
                context: "authorization response state",
                reason: "does not match the value sent in the authorization request".to_string(),
            });
        }
        Ok(BoundAuthorizationCode {
            code,
            pkce_verifier: self.pkce_verifier,
        })
    }
}

/// An authorization code bound to the PKCE verifier it must be redeemed with.
#[derive(Debug, Deserialize, Serialize)]
pub struct BoundAuthorizationCode {
    pub(crate) code: AuthorizationCode,
    pub(crate) pkce_verifier: PkceCodeVerifier,
}

/// Tokens granted by the authorization server.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenSet {
    access_token: AccessToken,
    token_type: TokenType,
    refresh_token: Option<RefreshToken>,
    expires_in: Option<Duration>,
}

impl TokenSet {
    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }
}

/// The authorized end state of the token exchange.
///
/// `ProofRequired` additionally holds the `c_nonce` to bind into the next proof of
/// possession. Operations on the issuance requester consume the state and return a new
/// one with the freshest `c_nonce` the issuer supplied.
#[derive(Debug, Deserialize, Serialize)]
pub enum AuthorizedRequest {
    NoProofRequired { tokens: TokenSet },
    ProofRequired { tokens: TokenSet, c_nonce: CNonce },
}

impl AuthorizedRequest {
    pub(crate) fn from_token_response(response: TokenResponse) -> Result<Self, Error> {
        let TokenResponse {
            access_token,
            token_type,
            refresh_token,
            expires_in,
            c_nonce,
            c_nonce_expires_in,
            ..
        } = response;

        let tokens = TokenSet {
            access_token,
            token_type,
            refresh_token,
            expires_in,
        };
        match c_nonce {
            Some(nonce) => Ok(Self::ProofRequired {
                tokens,
                c_nonce: CNonce::new(nonce, c_nonce_expires_in.map(|d| d.as_secs()))?,
            }),
            None => Ok(Self::NoProofRequired { tokens }),
        }
    }

    pub fn tokens(&self) -> &TokenSet {
        match self {
            Self::NoProofRequired { tokens } | Self::ProofRequired { tokens, .. } => tokens,
        }
    }

    pub fn access_token(&self) -> &AccessToken {
        self.tokens().access_token()
    }

    pub fn token_type(&self) -> TokenType {
        self.tokens().token_type()
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.tokens().refresh_token()
    }

    pub fn c_nonce(&self) -> Option<&CNonce> {
        match self {
            Self::NoProofRequired { .. } => None,
            Self::ProofRequired { c_nonce, .. } => Some(c_nonce),
        }
    }

    /// Transition to `ProofRequired` with a freshly issued nonce.
    pub(crate) fn with_c_nonce(self, c_nonce: CNonce) -> Self {
        let tokens = match self {
            Self::NoProofRequired { tokens } | Self::ProofRequired { tokens, .. } => tokens,
        };
        Self::ProofRequired { tokens, c_nonce }
    }

    /// Fold an optional `c_nonce` from a response into the state; absent means the
    /// current state is carried forward unchanged.
    pub(crate) fn apply_c_nonce(
        self,
        nonce: Option<String>,
        expires_in_seconds: Option<u64>,
    ) -> Result<Self, Error> {
        match nonce {
            Some(nonce) => {
                let c_nonce = CNonce::new(nonce, expires_in_seconds)?;
                Ok(self.with_c_nonce(c_nonce))
            }
            None => Ok(self),
        }
    }

    /// Replace the token set from a refresh-grant response, keeping the proof-state
    /// unless the response carries a new nonce.
    pub(crate) fn refreshed(self, response: TokenResponse) -> Result<Self, Error> {
        let prior_nonce = match self {
            Self::NoProofRequired { .. } => None,
            Self::ProofRequired { ref c_nonce, .. } => Some(c_nonce.clone()),
        };
        let refreshed = Self::from_token_response(response)?;
        match (&refreshed, prior_nonce) {
            (Self::NoProofRequired { .. }, Some(c_nonce)) => Ok(refreshed.with_c_nonce(c_nonce)),
            _ => Ok(refreshed),
        }
    }

    /// `Authorization` header matching the granted token type.
    pub(crate) fn authorization_header(&self) -> Result<(HeaderName, HeaderValue), Error> {
        let tokens = self.tokens();
        let value = format!(
            "{} {}",
            tokens.token_type().scheme(),
            tokens.access_token().secret()
        );
        let mut value = HeaderValue::from_str(&value).map_err(|e| Error::Validation {
            context: "access token",
            reason: e.to_string(),
        })?;
        value.set_sensitive(true);
        Ok((AUTHORIZATION, value))
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn token_response(value: Value) -> TokenResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn c_nonce_in_token_response_requires_proof() {
        let authorized = AuthorizedRequest::from_token_response(token_response(json!({
            "access_token": "opaque",
            "token_type": "DPoP",
            "c_nonce": "tZignsnFbp",
            "c_nonce_expires_in": 30
        })))
        .unwrap();

        assert!(matches!(authorized, AuthorizedRequest::ProofRequired { .. }));
        assert_eq!(authorized.c_nonce().unwrap().nonce(), "tZignsnFbp");
        assert_eq!(authorized.token_type(), TokenType::DPoP);
    }

    #[test]
    fn no_c_nonce_means_no_proof_required() {
        let authorized = AuthorizedRequest::from_token_response(token_response(json!({
            "access_token": "opaque",
            "token_type": "Bearer"
        })))
        .unwrap();

        assert!(matches!(
            authorized,
            AuthorizedRequest::NoProofRequired { .. }
        ));
        assert!(authorized.c_nonce().is_none());
    }

    #[test]
    fn fresh_nonce_replaces_the_held_one() {
        let authorized = AuthorizedRequest::from_token_response(token_response(json!({
            "access_token": "opaque",
            "token_type": "Bearer",
            "c_nonce": "first"
        })))
        .unwrap();

        let authorized = authorized
            .apply_c_nonce(Some("second".to_string()), Some(5))
            .unwrap();
        assert_eq!(authorized.c_nonce().unwrap().nonce(), "second");

        // An absent nonce leaves the state untouched.
        let authorized = authorized.apply_c_nonce(None, None).unwrap();
        assert_eq!(authorized.c_nonce().unwrap().nonce(), "second");
    }

    #[test]
    fn refresh_preserves_proof_state_without_new_nonce() {
        let authorized = AuthorizedRequest::from_token_response(token_response(json!({
            "access_token": "first-token",
            "token_type": "DPoP",
            "c_nonce": "held"
        })))
        .unwrap();

        let refreshed = authorized
            .refreshed(token_response(json!({
                "access_token": "second-token",
                "token_type": "DPoP"
            })))
            .unwrap();

        assert_eq!(refreshed.access_token().secret(), "second-token");
        assert_eq!(refreshed.c_nonce().unwrap().nonce(), "held");
    }

    #[test]
    fn authorization_header_matches_token_type() {
        let authorized = AuthorizedRequest::from_token_response(token_response(json!({
            "access_token": "opaque",
            "token_type": "DPoP"
        })))
        .unwrap();

        let (name, value) = authorized.authorization_header().unwrap();
        assert_eq!(name, AUTHORIZATION);
        assert_eq!(value.to_str().unwrap(), "DPoP opaque");
    }

    #[test]
    fn bind_code_rejects_a_foreign_state() {
        let prepared = PreparedAuthorizationRequest {
            authorization_url: "https://as.example/authorize?client_id=w".parse().unwrap(),
            request_uri: None,
            state: CsrfToken::new("expected".to_string()),
            pkce_verifier: PkceCodeVerifier::new("a".repeat(43)),
            configuration_ids: vec![],
        };

        prepared
            .bind_code(
                AuthorizationCode::new("code".to_string()),
                &CsrfToken::new("tampered".to_string()),
            )
            .unwrap_err();
    }
}
