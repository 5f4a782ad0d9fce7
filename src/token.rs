//! Token endpoint messages.
//!
//! See [RFC6749 §4.1.3](https://www.rfc-editor.org/rfc/rfc6749.html#section-4.1.3) and the
//! OpenID4VCI token request/response extensions. Requests are sent URL-encoded in the
//! request body; a `DPoP` header and client-attestation headers may accompany them.

use std::time::Duration;

use indexmap::IndexSet;
use oauth2::{AccessToken, AuthorizationCode, ClientId, RedirectUrl, RefreshToken};
use serde::{Deserialize, Serialize};
use serde_with::{
    formats::SpaceSeparator, serde_as, skip_serializing_none, DurationSeconds,
    StringWithSeparator,
};

use crate::{
    authorization::AuthorizationDetail,
    types::{PreAuthorizedCode, TxCode},
};

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    #[serde(flatten)]
    pub grant_type: TokenRequestGrantType,

    pub code_verifier: Option<String>,
    pub client_id: Option<ClientId>,

    /// MUST be the redirect URI value as passed to the authorization request.
    pub redirect_uri: Option<RedirectUrl>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "grant_type")]
pub enum TokenRequestGrantType {
    #[serde(rename = "authorization_code")]
    AuthorizationCode { code: AuthorizationCode },
    #[serde(rename = "urn:ietf:params:oauth:grant-type:pre-authorized_code")]
    PreAuthorizedCode {
        #[serde(rename = "pre-authorized_code")]
        pre_authorized_code: PreAuthorizedCode,
        tx_code: Option<TxCode>,
    },
    #[serde(rename = "refresh_token")]
    RefreshToken { refresh_token: RefreshToken },
}

/// Successful token response, including the OpenID4VCI extension members.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: AccessToken,
    pub token_type: TokenType,
    pub refresh_token: Option<RefreshToken>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub expires_in: Option<Duration>,

    pub c_nonce: Option<String>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub c_nonce_expires_in: Option<Duration>,

    #[serde_as(as = "Option<StringWithSeparator::<SpaceSeparator, String>>")]
    pub scope: Option<IndexSet<String>>,

    /// "REQUIRED when the authorization_details parameter is used to request issuance of
    /// a certain Credential type. MUST NOT be used otherwise."
    pub authorization_details: Option<Vec<AuthorizationDetail>>,
}

/// The scheme the access token is to be presented with.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TokenType {
    #[default]
    #[serde(rename = "Bearer", alias = "bearer")]
    Bearer,
    #[serde(rename = "DPoP", alias = "dpop")]
    DPoP,
}

impl TokenType {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::DPoP => "DPoP",
        }
    }
}
