use std::sync::Arc;

use oauth2::Scope;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, skip_serializing_none, KeyValueMap};
use ssi_jwk::JWK;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    error::{CryptoError, Error},
    http::{self, HttpClient},
    jose,
    profiles::ProfileConfiguration,
    proof_of_possession::KeyProofTypesSupported,
    response_encryption::CredentialResponseEncryptionMetadata,
    types::{
        BatchCredentialUrl, CredentialConfigurationId, CredentialIssuerId, CredentialUrl,
        DeferredCredentialUrl, IssuerUrl, JsonWebKeySetUrl, LanguageTag, LogoUri, NonceUrl,
        NotificationUrl,
    },
};

/// Credential Issuer Metadata, obtained from
/// `{issuer}/.well-known/openid-credential-issuer`.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialIssuerMetadata {
    credential_issuer: CredentialIssuerId,
    authorization_servers: Option<Vec<IssuerUrl>>,
    credential_endpoint: CredentialUrl,
    nonce_endpoint: Option<NonceUrl>,
    batch_credential_endpoint: Option<BatchCredentialUrl>,
    deferred_credential_endpoint: Option<DeferredCredentialUrl>,
    notification_endpoint: Option<NotificationUrl>,
    credential_response_encryption: Option<CredentialResponseEncryptionMetadata>,
    credential_identifiers_supported: Option<bool>,
    signed_metadata: Option<String>,
    display: Option<Vec<CredentialIssuerMetadataDisplay>>,
    #[serde(default)]
    #[serde_as(as = "KeyValueMap<_>")]
    credential_configurations_supported: Vec<CredentialConfiguration>,
}

impl CredentialIssuerMetadata {
    pub const METADATA_URL_SUFFIX: &'static str = ".well-known/openid-credential-issuer";

    pub fn new(credential_issuer: CredentialIssuerId, credential_endpoint: CredentialUrl) -> Self {
        Self {
            credential_issuer,
            authorization_servers: None,
            credential_endpoint,
            nonce_endpoint: None,
            batch_credential_endpoint: None,
            deferred_credential_endpoint: None,
            notification_endpoint: None,
            credential_response_encryption: None,
            credential_identifiers_supported: None,
            signed_metadata: None,
            display: None,
            credential_configurations_supported: vec![],
        }
    }

    field_getters_setters![
        pub self [self] ["credential issuer metadata value"] {
            set_credential_issuer -> credential_issuer[CredentialIssuerId],
            set_authorization_servers -> authorization_servers[Option<Vec<IssuerUrl>>],
            set_credential_endpoint -> credential_endpoint[CredentialUrl],
            set_nonce_endpoint -> nonce_endpoint[Option<NonceUrl>],
            set_batch_credential_endpoint -> batch_credential_endpoint[Option<BatchCredentialUrl>],
            set_deferred_credential_endpoint -> deferred_credential_endpoint[Option<DeferredCredentialUrl>],
            set_notification_endpoint -> notification_endpoint[Option<NotificationUrl>],
            set_credential_response_encryption -> credential_response_encryption[Option<CredentialResponseEncryptionMetadata>],
            set_credential_identifiers_supported -> credential_identifiers_supported[Option<bool>],
            set_signed_metadata -> signed_metadata[Option<String>],
            set_display -> display[Option<Vec<CredentialIssuerMetadataDisplay>>],
            set_credential_configurations_supported -> credential_configurations_supported[Vec<CredentialConfiguration>],
        }
    ];

    /// Look up a supported credential configuration by its identifier.
    pub fn configuration(
        &self,
        id: &CredentialConfigurationId,
    ) -> Option<&CredentialConfiguration> {
        self.credential_configurations_supported
            .iter()
            .find(|configuration| configuration.name() == id)
    }

    /// Resolve the issuer metadata, applying the configured signed-metadata policy.
    pub async fn resolve<C: HttpClient>(
        http_client: &C,
        issuer: &CredentialIssuerId,
        policy: &IssuerMetadataPolicy,
    ) -> Result<Self, Error> {
        let discovery_url =
            issuer
                .join(Self::METADATA_URL_SUFFIX)
                .map_err(|e| Error::MetadataInvalid {
                    reason: format!("failed to construct metadata URL: {e}"),
                })?;
        let response = super::fetch_document(http_client, &discovery_url).await?;

        let unsigned: Map<String, Value> =
            http::decode_json(response.body()).map_err(|e| Error::MetadataInvalid {
                reason: e.to_string(),
            })?;

        let document = match policy {
            IssuerMetadataPolicy::IgnoreSigned => unsigned,
            IssuerMetadataPolicy::RequireSigned(trust) => {
                match unsigned.get("signed_metadata").and_then(Value::as_str) {
                    Some(jwt) => {
                        let jwt = jwt.to_string();
                        merge_signed_claims(
                            unsigned,
                            verified_signed_claims(http_client, &jwt, issuer, trust).await?,
                        )
                    }
                    None => {
                        return Err(Error::MetadataInvalid {
                            reason: "signed_metadata is required by policy but absent".to_string(),
                        })
                    }
                }
            }
            IssuerMetadataPolicy::PreferSigned(trust) => {
                match unsigned.get("signed_metadata").and_then(Value::as_str) {
                    Some(jwt) => {
                        let jwt = jwt.to_string();
                        merge_signed_claims(
                            unsigned,
                            verified_signed_claims(http_client, &jwt, issuer, trust).await?,
                        )
                    }
                    None => {
                        debug!("no signed_metadata published, falling back to unsigned document");
                        unsigned
                    }
                }
            }
        };

        let metadata: Self = serde_path_to_error::deserialize(Value::Object(document))
            .map_err(|e: serde_path_to_error::Error<serde_json::Error>| Error::MetadataInvalid {
                reason: e.to_string(),
            })?;

        if metadata.credential_issuer != *issuer {
            return Err(Error::MetadataInvalid {
                reason: format!(
                    "unexpected issuer identifier `{}` (expected `{}`)",
                    metadata.credential_issuer.as_str(),
                    issuer.as_str()
                ),
            });
        }

        Ok(metadata)
    }
}

/// Contract for the pluggable JWS verification collaborator used on signed issuer metadata.
pub trait SignedJwtVerifier: Send + Sync {
    /// Verify the compact JWS against the given trust source. The `JwksUrl` variant is
    /// resolved to `Keys` by the metadata resolver before this is invoked.
    fn verify(&self, compact_jws: &str, trust: &MetadataTrust) -> Result<(), CryptoError>;
}

/// Trust anchors for signed issuer metadata.
#[derive(Clone, Debug)]
pub enum MetadataTrust {
    /// Pinned JWKs.
    Keys(Vec<JWK>),
    /// JWK Set document fetched at resolution time and reduced to [`MetadataTrust::Keys`].
    JwksUrl(JsonWebKeySetUrl),
    /// DER-encoded root certificates for validating the `x5c` header chain.
    X5cTrustRoots(Vec<Vec<u8>>),
}

#[derive(Clone)]
pub struct MetadataTrustPolicy {
    pub trust: MetadataTrust,
    pub verifier: Arc<dyn SignedJwtVerifier>,
}

impl std::fmt::Debug for MetadataTrustPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTrustPolicy")
            .field("trust", &self.trust)
            .finish_non_exhaustive()
    }
}

/// How `signed_metadata` in the issuer metadata document is treated.
#[derive(Clone, Debug, Default)]
pub enum IssuerMetadataPolicy {
    /// Use the unsigned JSON as-is, ignoring any `signed_metadata`.
    #[default]
    IgnoreSigned,
    /// Require a verifiable `signed_metadata` JWT; its claims override the unsigned ones.
    RequireSigned(MetadataTrustPolicy),
    /// As `RequireSigned`, but fall back to the unsigned document when no signature is
    /// published.
    PreferSigned(MetadataTrustPolicy),
}

#[derive(Deserialize)]
struct JwkSet {
    keys: Vec<JWK>,
}

async fn verified_signed_claims<C: HttpClient>(
    http_client: &C,
    jwt: &str,
    issuer: &CredentialIssuerId,
    policy: &MetadataTrustPolicy,
) -> Result<Map<String, Value>, Error> {
    let trust = match &policy.trust {
        MetadataTrust::JwksUrl(url) => {
            let response = super::fetch_document(http_client, url.url()).await?;
            let jwks: JwkSet =
                http::decode_json(response.body()).map_err(|e| Error::MetadataInvalid {
                    reason: format!("invalid JWK Set document: {e}"),
                })?;
            MetadataTrust::Keys(jwks.keys)
        }
        other => other.clone(),
    };

    policy
        .verifier
        .verify(jwt, &trust)
        .map_err(|e| Error::MetadataInvalid {
            reason: format!("signed_metadata verification failed: {e}"),
        })?;

    let (_, claims) = jose::decode_unverified(jwt).map_err(|_| Error::MetadataInvalid {
        reason: "signed_metadata is not a well-formed JWT".to_string(),
    })?;

    let issuer_claim = |name: &str| claims.get(name).and_then(Value::as_str);
    if issuer_claim("iss") != Some(issuer.as_str()) {
        return Err(Error::MetadataInvalid {
            reason: "signed_metadata `iss` does not match the credential issuer".to_string(),
        });
    }
    if issuer_claim("sub") != Some(issuer.as_str()) {
        return Err(Error::MetadataInvalid {
            reason: "signed_metadata `sub` does not match the credential issuer".to_string(),
        });
    }
    if !claims.get("iat").map(Value::is_number).unwrap_or(false) {
        return Err(Error::MetadataInvalid {
            reason: "signed_metadata is missing `iat`".to_string(),
        });
    }
    if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
        if exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(Error::MetadataInvalid {
                reason: "signed_metadata has expired".to_string(),
            });
        }
    }

    Ok(claims)
}

// Claims registered in RFC 7519; these carry the signature envelope, not metadata.
const REGISTERED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

fn merge_signed_claims(
    mut unsigned: Map<String, Value>,
    signed: Map<String, Value>,
) -> Map<String, Value> {
    for (name, value) in signed {
        if REGISTERED_CLAIMS.contains(&name.as_str()) {
            continue;
        }
        unsigned.insert(name, value);
    }
    unsigned
}

/// A single entry of `credential_configurations_supported`.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialConfiguration {
    #[serde(rename = "$key$")]
    name: CredentialConfigurationId,
    scope: Option<Scope>,
    cryptographic_binding_methods_supported: Option<Vec<CryptographicBindingMethod>>,
    #[serde_as(as = "Option<KeyValueMap<_>>")]
    proof_types_supported: Option<Vec<KeyProofTypesSupported>>,
    display: Option<Vec<CredentialMetadataDisplay>>,
    #[serde(flatten)]
    profile: ProfileConfiguration,
}

impl CredentialConfiguration {
    pub fn new(name: CredentialConfigurationId, profile: ProfileConfiguration) -> Self {
        Self {
            name,
            scope: None,
            cryptographic_binding_methods_supported: None,
            proof_types_supported: None,
            display: None,
            profile,
        }
    }

    field_getters_setters![
        pub self [self] ["credential configuration value"] {
            set_name -> name[CredentialConfigurationId],
            set_scope -> scope[Option<Scope>],
            set_cryptographic_binding_methods_supported -> cryptographic_binding_methods_supported[Option<Vec<CryptographicBindingMethod>>],
            set_proof_types_supported -> proof_types_supported[Option<Vec<KeyProofTypesSupported>>],
            set_display -> display[Option<Vec<CredentialMetadataDisplay>>],
            set_profile -> profile[ProfileConfiguration],
        }
    ];
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum CryptographicBindingMethod {
    #[serde(rename = "jwk")]
    Jwk,
    #[serde(rename = "cose_key")]
    Cose,
    #[serde(rename = "mso")]
    Mso,
    #[serde(rename = "did:")]
    Did,
    #[serde(untagged)]
    Extension(String),
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialIssuerMetadataDisplay {
    name: Option<String>,
    locale: Option<LanguageTag>,
    logo: Option<MetadataDisplayLogo>,
}

impl CredentialIssuerMetadataDisplay {
    pub fn new(
        name: Option<String>,
        locale: Option<LanguageTag>,
        logo: Option<MetadataDisplayLogo>,
    ) -> Self {
        Self { name, locale, logo }
    }

    field_getters_setters![
        pub self [self] ["issuer display value"] {
            set_name -> name[Option<String>],
            set_locale -> locale[Option<LanguageTag>],
            set_logo -> logo[Option<MetadataDisplayLogo>],
        }
    ];
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MetadataDisplayLogo {
    uri: LogoUri,
    alt_text: Option<String>,
}

impl MetadataDisplayLogo {
    pub fn new(uri: LogoUri, alt_text: Option<String>) -> Self {
        Self { uri, alt_text }
    }

    field_getters_setters![
        pub self [self] ["display logo value"] {
            set_uri -> uri[LogoUri],
            set_alt_text -> alt_text[Option<String>],
        }
    ];
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialMetadataDisplay {
    name: String,
    locale: Option<LanguageTag>,
    logo: Option<MetadataDisplayLogo>,
    description: Option<String>,
    background_color: Option<String>,
    background_image: Option<MetadataBackgroundImage>,
    text_color: Option<String>,
}

impl CredentialMetadataDisplay {
    pub fn new(name: String) -> Self {
        Self {
            name,
            locale: None,
            logo: None,
            description: None,
            background_color: None,
            background_image: None,
            text_color: None,
        }
    }

    field_getters_setters![
        pub self [self] ["credential display value"] {
            set_name -> name[String],
            set_locale -> locale[Option<LanguageTag>],
            set_logo -> logo[Option<MetadataDisplayLogo>],
            set_description -> description[Option<String>],
            set_background_color -> background_color[Option<String>],
            set_background_image -> background_image[Option<MetadataBackgroundImage>],
            set_text_color -> text_color[Option<String>],
        }
    ];
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MetadataBackgroundImage {
    uri: LogoUri,
}

impl MetadataBackgroundImage {
    pub fn new(uri: LogoUri) -> Self {
        Self { uri }
    }

    field_getters_setters![
        pub self [self] ["background image value"] {
            set_uri -> uri[LogoUri],
        }
    ];
}
