use oauth2::{AuthUrl, IntrospectionUrl, PkceCodeChallengeMethod, ResponseType, Scope, TokenUrl};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::{
    error::Error,
    http::{self, HttpClient},
    metadata::CredentialIssuerMetadata,
    types::{IssuerUrl, JsonWebKeySetUrl, ParUrl},
};

/// Authorization Server Metadata according to
/// [RFC8414](https://datatracker.ietf.org/doc/html/rfc8414), restricted to the parameters
/// this client consumes, with the following additions:
/// * `pre-authorized_grant_anonymous_access_supported` (OpenID4VCI);
/// * the Pushed Authorization Request parameters from
///   [RFC9126](https://datatracker.ietf.org/doc/html/rfc9126);
/// * `dpop_signing_alg_values_supported` from
///   [RFC9449](https://datatracker.ietf.org/doc/html/rfc9449).
///
/// Anything else the server publishes remains accessible via `additional_fields`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AuthorizationServerMetadata {
    issuer: IssuerUrl,
    authorization_endpoint: AuthUrl,
    token_endpoint: TokenUrl,
    response_types_supported: Vec<ResponseType>,
    jwks_uri: Option<JsonWebKeySetUrl>,
    scopes_supported: Option<Vec<Scope>>,
    #[serde(default)]
    grant_types_supported: GrantTypesSupported,
    introspection_endpoint: Option<IntrospectionUrl>,
    code_challenge_methods_supported: Option<Vec<PkceCodeChallengeMethod>>,
    token_endpoint_auth_methods_supported: Option<Vec<String>>,
    dpop_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(default, rename = "pre-authorized_grant_anonymous_access_supported")]
    pre_authorized_grant_anonymous_access_supported: bool,
    pushed_authorization_request_endpoint: Option<ParUrl>,
    #[serde(default)]
    require_pushed_authorization_requests: bool,
    #[serde(flatten)]
    additional_fields: Map<String, Json>,
}

impl AuthorizationServerMetadata {
    pub const OPENID_METADATA_URL_SUFFIX: &'static str = ".well-known/openid-configuration";
    pub const OAUTH_METADATA_URL_SUFFIX: &'static str = ".well-known/oauth-authorization-server";

    /// Method name signalling Attestation-Based Client Authentication support in
    /// `token_endpoint_auth_methods_supported`.
    pub const ATTEST_JWT_CLIENT_AUTH: &'static str = "attest_jwt_client_auth";

    field_getters_setters![
        pub self [self] ["authorization server metadata value"] {
            set_issuer -> issuer[IssuerUrl],
            set_authorization_endpoint -> authorization_endpoint[AuthUrl],
            set_token_endpoint -> token_endpoint[TokenUrl],
            set_response_types_supported -> response_types_supported[Vec<ResponseType>],
            set_jwks_uri -> jwks_uri[Option<JsonWebKeySetUrl>],
            set_scopes_supported -> scopes_supported[Option<Vec<Scope>>],
            set_grant_types_supported -> grant_types_supported[GrantTypesSupported],
            set_introspection_endpoint -> introspection_endpoint[Option<IntrospectionUrl>],
            set_code_challenge_methods_supported -> code_challenge_methods_supported[Option<Vec<PkceCodeChallengeMethod>>],
            set_token_endpoint_auth_methods_supported -> token_endpoint_auth_methods_supported[Option<Vec<String>>],
            set_dpop_signing_alg_values_supported -> dpop_signing_alg_values_supported[Option<Vec<String>>],
            set_pushed_authorization_request_endpoint -> pushed_authorization_request_endpoint[Option<ParUrl>],
        }
    ];

    pub fn pre_authorized_grant_anonymous_access_supported(&self) -> bool {
        self.pre_authorized_grant_anonymous_access_supported
    }

    pub fn require_pushed_authorization_requests(&self) -> bool {
        self.require_pushed_authorization_requests
    }

    pub fn additional_fields(&self) -> &Map<String, Json> {
        &self.additional_fields
    }

    /// Whether the server declares support for Attestation-Based Client Authentication.
    pub fn supports_client_attestation(&self) -> bool {
        self.token_endpoint_auth_methods_supported
            .as_deref()
            .is_some_and(|methods| {
                methods
                    .iter()
                    .any(|method| method == Self::ATTEST_JWT_CLIENT_AUTH)
            })
    }

    /// Resolve the authorization server metadata, probing OpenID Connect discovery first
    /// and falling back to the plain OAuth 2.0 metadata document.
    pub async fn resolve<C: HttpClient>(
        http_client: &C,
        issuer: &IssuerUrl,
    ) -> Result<Self, Error> {
        match Self::resolve_with_suffix(http_client, issuer, Self::OPENID_METADATA_URL_SUFFIX)
            .await
        {
            Ok(metadata) => Ok(metadata),
            Err(Error::MetadataInvalid { reason }) => {
                debug!(
                    %reason,
                    "OpenID Connect discovery unusable, probing OAuth 2.0 metadata"
                );
                Self::resolve_with_suffix(http_client, issuer, Self::OAUTH_METADATA_URL_SUFFIX)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_with_suffix<C: HttpClient>(
        http_client: &C,
        issuer: &IssuerUrl,
        suffix: &str,
    ) -> Result<Self, Error> {
        let discovery_url = issuer.join(suffix).map_err(|e| Error::MetadataInvalid {
            reason: format!("failed to construct metadata URL: {e}"),
        })?;
        let response = super::fetch_document(http_client, &discovery_url).await?;

        let metadata: Self =
            http::decode_json(response.body()).map_err(|e| Error::MetadataInvalid {
                reason: e.to_string(),
            })?;

        if metadata.issuer != *issuer {
            return Err(Error::MetadataInvalid {
                reason: format!(
                    "unexpected issuer `{}` (expected `{}`)",
                    metadata.issuer.as_str(),
                    issuer.as_str()
                ),
            });
        }

        Ok(metadata)
    }

    /// Pick the authorization server to use for an offer.
    ///
    /// When the offer names an authorization server it must be one the issuer advertises;
    /// otherwise the first advertised server is used, and an issuer advertising none acts
    /// as its own authorization server.
    pub fn select_for_offer(
        issuer_metadata: &CredentialIssuerMetadata,
        preferred: Option<&IssuerUrl>,
    ) -> Result<IssuerUrl, Error> {
        let advertised = issuer_metadata
            .authorization_servers()
            .map(Vec::as_slice)
            .unwrap_or_default();

        if let Some(preferred) = preferred {
            return if advertised.contains(preferred) {
                Ok(preferred.clone())
            } else {
                Err(Error::OfferInvalid {
                    reason: format!(
                        "authorization server `{}` is not advertised by the issuer",
                        preferred.as_str()
                    ),
                })
            };
        }

        Ok(advertised.first().cloned().unwrap_or_else(|| {
            IssuerUrl::from_url(issuer_metadata.credential_issuer().url().clone())
        }))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct GrantTypesSupported(pub Vec<GrantType>);

impl Default for GrantTypesSupported {
    fn default() -> Self {
        // RFC 8414 default when the parameter is omitted.
        Self(vec![GrantType::AuthorizationCode, GrantType::Implicit])
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    AuthorizationCode,
    Implicit,
    RefreshToken,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:pre-authorized_code")]
    PreAuthorizedCode,
    #[serde(untagged)]
    Extension(String),
}
