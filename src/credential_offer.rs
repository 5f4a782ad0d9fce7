//! Credential offers: wire representation, QR/deep-link parsing, and resolution into a
//! fully validated domain object backed by issuer and authorization server metadata.

use oauth2::Scope;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use url::Url;

use crate::{
    error::Error,
    http::{self, HttpClient},
    metadata::{AuthorizationServerMetadata, CredentialIssuerMetadata, IssuerMetadataPolicy},
    profiles::ProfileConfiguration,
    types::{CredentialConfigurationId, CredentialIssuerId, IssuerUrl, IssuerState,
        PreAuthorizedCode, TxCode},
};

/// A credential offer as handed to the wallet, before any resolution.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum CredentialOfferRequest {
    /// The offer object passed by value, as a raw JSON string.
    Value(String),
    /// A URL to fetch the offer object from.
    Reference(Url),
}

impl CredentialOfferRequest {
    /// URL scheme of credential offers in QR codes and deep links.
    pub const DEFAULT_URL_SCHEME: &'static str = "openid-credential-offer";

    /// Parse the credential offer request from a URL with the given scheme, as scanned
    /// from a QR code or received through a deep link.
    pub fn from_url_with_scheme(url: &Url, expected_scheme: &str) -> Result<Self, Error> {
        if url.scheme() != expected_scheme {
            return Err(Error::OfferInvalid {
                reason: format!(
                    "unexpected URL scheme `{}`, expected `{expected_scheme}`",
                    url.scheme()
                ),
            });
        }

        let mut by_value = None;
        let mut by_reference = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "credential_offer" => by_value = Some(value.into_owned()),
                "credential_offer_uri" => by_reference = Some(value.into_owned()),
                _ => {}
            }
        }

        match (by_value, by_reference) {
            (Some(offer), None) => Ok(Self::Value(offer)),
            (None, Some(uri)) => {
                let uri = Url::parse(&uri).map_err(|e| Error::OfferInvalid {
                    reason: format!("invalid credential_offer_uri: {e}"),
                })?;
                Ok(Self::Reference(uri))
            }
            _ => Err(Error::OfferInvalid {
                reason: "expected exactly one of credential_offer and credential_offer_uri"
                    .to_string(),
            }),
        }
    }

    /// As [`CredentialOfferRequest::from_url_with_scheme`], expecting the
    /// `openid-credential-offer` scheme.
    pub fn from_url(url: &Url) -> Result<Self, Error> {
        Self::from_url_with_scheme(url, Self::DEFAULT_URL_SCHEME)
    }
}

/// The Credential Offer object as it appears on the wire.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CredentialOfferObject {
    credential_issuer: CredentialIssuerId,
    credential_configuration_ids: Vec<CredentialConfigurationId>,
    grants: Option<Grants>,
}

impl CredentialOfferObject {
    pub fn new(
        credential_issuer: CredentialIssuerId,
        credential_configuration_ids: Vec<CredentialConfigurationId>,
    ) -> Self {
        Self {
            credential_issuer,
            credential_configuration_ids,
            grants: None,
        }
    }

    field_getters_setters![
        pub self [self] ["credential offer value"] {
            set_credential_issuer -> credential_issuer[CredentialIssuerId],
            set_credential_configuration_ids -> credential_configuration_ids[Vec<CredentialConfigurationId>],
            set_grants -> grants[Option<Grants>],
        }
    ];
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Grants {
    authorization_code: Option<AuthorizationCodeGrant>,
    #[serde(rename = "urn:ietf:params:oauth:grant-type:pre-authorized_code")]
    pre_authorized_code: Option<PreAuthorizedCodeGrant>,
}

impl Grants {
    pub fn new(
        authorization_code: Option<AuthorizationCodeGrant>,
        pre_authorized_code: Option<PreAuthorizedCodeGrant>,
    ) -> Self {
        Self {
            authorization_code,
            pre_authorized_code,
        }
    }

    field_getters_setters![
        pub self [self] ["credential offer grants"] {
            set_authorization_code -> authorization_code[Option<AuthorizationCodeGrant>],
            set_pre_authorized_code -> pre_authorized_code[Option<PreAuthorizedCodeGrant>],
        }
    ];
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AuthorizationCodeGrant {
    issuer_state: Option<IssuerState>,
    authorization_server: Option<IssuerUrl>,
}

impl AuthorizationCodeGrant {
    pub fn new(issuer_state: Option<IssuerState>, authorization_server: Option<IssuerUrl>) -> Self {
        Self {
            issuer_state,
            authorization_server,
        }
    }

    field_getters_setters![
        pub self [self] ["authorization code grant value"] {
            set_issuer_state -> issuer_state[Option<IssuerState>],
            set_authorization_server -> authorization_server[Option<IssuerUrl>],
        }
    ];
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PreAuthorizedCodeGrant {
    #[serde(rename = "pre-authorized_code")]
    pre_authorized_code: PreAuthorizedCode,
    tx_code: Option<TxCodeDefinition>,
    interval: Option<u64>,
    authorization_server: Option<IssuerUrl>,
}

impl PreAuthorizedCodeGrant {
    pub fn new(pre_authorized_code: PreAuthorizedCode) -> Self {
        Self {
            pre_authorized_code,
            tx_code: None,
            interval: None,
            authorization_server: None,
        }
    }

    field_getters_setters![
        pub self [self] ["pre-authorized_code grant value"] {
            set_pre_authorized_code -> pre_authorized_code[PreAuthorizedCode],
            set_tx_code -> tx_code[Option<TxCodeDefinition>],
            set_interval -> interval[Option<u64>],
            set_authorization_server -> authorization_server[Option<IssuerUrl>],
        }
    ];
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub enum InputMode {
    #[default]
    #[serde(rename = "numeric")]
    Numeric,
    #[serde(rename = "text")]
    Text,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TxCodeDefinition {
    input_mode: Option<InputMode>,
    length: Option<usize>,
    description: Option<String>,
}

impl TxCodeDefinition {
    pub fn new(
        input_mode: Option<InputMode>,
        length: Option<usize>,
        description: Option<String>,
    ) -> Self {
        Self {
            input_mode,
            length,
            description,
        }
    }

    field_getters_setters![
        pub self [self] ["transaction code value"] {
            set_input_mode -> input_mode[Option<InputMode>],
            set_length -> length[Option<usize>],
            set_description -> description[Option<String>],
        }
    ];

    /// Check a user-supplied transaction code against the announced shape.
    pub fn validate(&self, tx_code: &TxCode) -> Result<(), Error> {
        let value = tx_code.secret();
        if let Some(length) = self.length {
            if value.chars().count() != length {
                return Err(Error::Validation {
                    context: "tx_code",
                    reason: format!("expected {length} characters"),
                });
            }
        }
        if matches!(self.input_mode.clone().unwrap_or_default(), InputMode::Numeric)
            && !value.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::Validation {
                context: "tx_code",
                reason: "expected numeric input".to_string(),
            });
        }
        Ok(())
    }
}

/// How an offered credential is requested during authorization.
#[derive(Clone, Debug, PartialEq)]
pub enum OfferedCredentialAccess {
    /// The issuer exposes an OAuth scope for this configuration.
    ByScope(Scope),
    /// No scope; authorization goes through `authorization_details`, shaped by the
    /// format profile.
    ByProfile(ProfileConfiguration),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OfferedCredential {
    pub configuration_id: CredentialConfigurationId,
    pub access: OfferedCredentialAccess,
}

/// A resolved credential offer: the wire object validated against the issuer metadata,
/// with the protecting authorization server discovered.
#[derive(Clone, Debug)]
pub struct CredentialOffer {
    credential_issuer: CredentialIssuerId,
    issuer_metadata: CredentialIssuerMetadata,
    authorization_metadata: AuthorizationServerMetadata,
    credentials: Vec<OfferedCredential>,
    grants: Option<Grants>,
}

impl CredentialOffer {
    /// Resolve a credential offer request into a validated [`CredentialOffer`].
    pub async fn resolve<C: HttpClient>(
        http_client: &C,
        request: CredentialOfferRequest,
        metadata_policy: &IssuerMetadataPolicy,
    ) -> Result<Self, Error> {
        let offer: CredentialOfferObject = match request {
            CredentialOfferRequest::Value(raw) => {
                serde_json::from_str(&raw).map_err(|e| Error::OfferInvalid {
                    reason: e.to_string(),
                })?
            }
            CredentialOfferRequest::Reference(url) => {
                let response = http_client.execute(http::json_get_request(&url)?).await?;
                if !response.status().is_success() {
                    return Err(Error::OfferInvalid {
                        reason: format!("HTTP status code {} at {}", response.status(), url),
                    });
                }
                http::decode_json(response.body()).map_err(|e| Error::OfferInvalid {
                    reason: e.to_string(),
                })?
            }
        };

        Self::from_offer_object(http_client, offer, metadata_policy).await
    }

    /// Resolve an already parsed Credential Offer object.
    pub async fn from_offer_object<C: HttpClient>(
        http_client: &C,
        offer: CredentialOfferObject,
        metadata_policy: &IssuerMetadataPolicy,
    ) -> Result<Self, Error> {
        let issuer_metadata = CredentialIssuerMetadata::resolve(
            http_client,
            offer.credential_issuer(),
            metadata_policy,
        )
        .await?;

        let preferred_server = offer
            .grants()
            .and_then(Grants::authorization_code)
            .and_then(AuthorizationCodeGrant::authorization_server);
        let authorization_server =
            AuthorizationServerMetadata::select_for_offer(&issuer_metadata, preferred_server)?;
        let authorization_metadata =
            AuthorizationServerMetadata::resolve(http_client, &authorization_server).await?;

        let credentials = offer
            .credential_configuration_ids()
            .iter()
            .map(|id| {
                let configuration =
                    issuer_metadata
                        .configuration(id)
                        .ok_or_else(|| Error::OfferInvalid {
                            reason: format!(
                                "offered credential configuration `{}` is not supported \
                                 by the issuer",
                                id.as_str()
                            ),
                        })?;
                let access = match configuration.scope() {
                    Some(scope) => OfferedCredentialAccess::ByScope(scope.clone()),
                    None => OfferedCredentialAccess::ByProfile(configuration.profile().clone()),
                };
                Ok(OfferedCredential {
                    configuration_id: id.clone(),
                    access,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let CredentialOfferObject {
            credential_issuer,
            grants,
            ..
        } = offer;

        Ok(Self {
            credential_issuer,
            issuer_metadata,
            authorization_metadata,
            credentials,
            grants,
        })
    }

    pub fn credential_issuer(&self) -> &CredentialIssuerId {
        &self.credential_issuer
    }

    pub fn issuer_metadata(&self) -> &CredentialIssuerMetadata {
        &self.issuer_metadata
    }

    pub fn authorization_metadata(&self) -> &AuthorizationServerMetadata {
        &self.authorization_metadata
    }

    pub fn credentials(&self) -> &[OfferedCredential] {
        &self.credentials
    }

    pub fn grants(&self) -> Option<&Grants> {
        self.grants.as_ref()
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn example_credential_offer_object() {
        let offer: CredentialOfferObject = serde_json::from_value(json!({
            "credential_issuer": "https://issuer.example",
            "credential_configuration_ids": [
                "eu.europa.ec.eudi.pid_mso_mdoc",
                "eu.europa.ec.eudi.pid_vc_sd_jwt"
            ],
            "grants": {
                "authorization_code": {
                    "issuer_state": "eyJhbGciOiJSU0Et...FYUaBy"
                },
                "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                    "pre-authorized_code": "adhjhdjajkdkhjhdj",
                    "tx_code": {
                        "length": 4,
                        "input_mode": "numeric",
                        "description": "Please provide the one-time code that was sent via e-mail"
                    }
                }
            }
        }))
        .unwrap();

        let grants = offer.grants().unwrap();
        assert!(grants.authorization_code().is_some());
        let pre_authorized = grants.pre_authorized_code().unwrap();
        assert_eq!(pre_authorized.pre_authorized_code().secret(), "adhjhdjajkdkhjhdj");
        assert_eq!(pre_authorized.tx_code().unwrap().length(), Some(&4));
    }

    #[test]
    fn offer_object_round_trips() {
        let original = json!({
            "credential_issuer": "https://issuer.example",
            "credential_configuration_ids": ["eu.europa.ec.eudi.pid_mso_mdoc"],
            "grants": {
                "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                    "pre-authorized_code": "PRE-123",
                    "tx_code": { "input_mode": "numeric", "length": 4 },
                    "interval": 5
                }
            }
        });

        let offer: CredentialOfferObject = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(serde_json::to_value(&offer).unwrap(), original);
    }

    #[test]
    fn offer_url_by_value() {
        let url = Url::parse(
            "openid-credential-offer://?credential_offer=%7B%22credential_issuer%22%3A%22https%3A%2F%2Fissuer.example%22%2C%22credential_configuration_ids%22%3A%5B%22pid%22%5D%7D",
        )
        .unwrap();

        let CredentialOfferRequest::Value(raw) = CredentialOfferRequest::from_url(&url).unwrap()
        else {
            panic!("expected an offer by value");
        };
        let offer: CredentialOfferObject = serde_json::from_str(&raw).unwrap();
        assert_eq!(offer.credential_issuer().as_str(), "https://issuer.example");
    }

    #[test]
    fn offer_url_by_reference() {
        let url = Url::parse(
            "openid-credential-offer://?credential_offer_uri=https%3A%2F%2Fissuer.example%2Foffers%2F1",
        )
        .unwrap();

        let CredentialOfferRequest::Reference(uri) =
            CredentialOfferRequest::from_url(&url).unwrap()
        else {
            panic!("expected an offer by reference");
        };
        assert_eq!(uri.as_str(), "https://issuer.example/offers/1");
    }

    #[test]
    fn offer_url_with_wrong_scheme_is_rejected() {
        let url = Url::parse("https://wallet.example/?credential_offer_uri=https%3A%2F%2Fissuer.example%2Fo").unwrap();
        CredentialOfferRequest::from_url(&url).unwrap_err();
    }

    #[test]
    fn tx_code_shape_validation() {
        let definition = TxCodeDefinition::new(Some(InputMode::Numeric), Some(4), None);
        definition.validate(&TxCode::new("1234".to_string())).unwrap();
        definition
            .validate(&TxCode::new("12345".to_string()))
            .unwrap_err();
        definition
            .validate(&TxCode::new("12a4".to_string()))
            .unwrap_err();

        // input_mode defaults to numeric when the issuer does not announce one.
        TxCodeDefinition::new(None, None, None)
            .validate(&TxCode::new("letters".to_string()))
            .unwrap_err();
        TxCodeDefinition::new(Some(InputMode::Text), None, None)
            .validate(&TxCode::new("letters".to_string()))
            .unwrap();
    }
}
