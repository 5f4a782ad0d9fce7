//! Credential format profiles.
//!
//! Each supported format contributes the profile-specific members of a credential
//! configuration and the shape of its claim sets. Formats this crate does not know
//! round-trip as an opaque JSON object so metadata and offers from newer issuers keep
//! working.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

pub mod mso_mdoc;
pub mod sd_jwt_vc;

/// W3C Verifiable Credential formats are recognized so they can be rejected loudly
/// instead of failing somewhere deep in request construction.
const W3C_FORMAT_IDENTIFIERS: [&str; 3] = ["jwt_vc_json", "jwt_vc_json-ld", "ldp_vc"];

/// The profile-specific members of a credential configuration, discriminated by `format`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProfileConfiguration {
    Known(KnownProfileConfiguration),
    /// A format this crate has no profile for; all members are carried verbatim.
    Unknown(Map<String, Value>),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "format")]
pub enum KnownProfileConfiguration {
    #[serde(rename = "mso_mdoc")]
    MsoMdoc(mso_mdoc::Configuration),
    #[serde(rename = "dc+sd-jwt")]
    SdJwtVc(sd_jwt_vc::Configuration),
}

impl ProfileConfiguration {
    /// The format discriminator, if present.
    pub fn format(&self) -> Option<&str> {
        match self {
            Self::Known(KnownProfileConfiguration::MsoMdoc(_)) => Some(mso_mdoc::FORMAT_IDENTIFIER),
            Self::Known(KnownProfileConfiguration::SdJwtVc(_)) => Some(sd_jwt_vc::FORMAT_IDENTIFIER),
            Self::Unknown(members) => members.get("format").and_then(Value::as_str),
        }
    }

    /// Reject configurations this crate refuses to build requests for.
    pub(crate) fn check_requestable(&self) -> Result<(), Error> {
        match self.format() {
            Some(format) if W3C_FORMAT_IDENTIFIERS.contains(&format) => Err(
                Error::UnsupportedFeature("W3C Verifiable Credential formats"),
            ),
            _ => Ok(()),
        }
    }

    /// Encode a claim set for a credential request, checking it against the format.
    pub(crate) fn encode_claim_set(&self, claim_set: &ClaimSet) -> Result<Value, Error> {
        match (self, claim_set) {
            (Self::Known(KnownProfileConfiguration::MsoMdoc(_)), ClaimSet::MsoMdoc(claims)) => {
                serialize_claims(claims)
            }
            (Self::Known(KnownProfileConfiguration::SdJwtVc(_)), ClaimSet::SdJwtVc(claims)) => {
                serialize_claims(claims)
            }
            (Self::Unknown(_), ClaimSet::Other(value)) => Ok(value.clone()),
            _ => Err(Error::Validation {
                context: "claim set",
                reason: format!(
                    "claim set does not match credential format `{}`",
                    self.format().unwrap_or("<unknown>")
                ),
            }),
        }
    }
}

fn serialize_claims<T: Serialize>(claims: &T) -> Result<Value, Error> {
    serde_json::to_value(claims).map_err(|e| Error::Validation {
        context: "claim set",
        reason: e.to_string(),
    })
}

/// A format-shaped claim subset to request, embedded into the credential request body
/// through the owning profile's encoder.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClaimSet {
    MsoMdoc(mso_mdoc::Claims<Value>),
    SdJwtVc(sd_jwt_vc::Claims<Value>),
    Other(Value),
}

/// Display-oriented metadata an issuer attaches to an individual claim.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct ClaimMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<Vec<ClaimDisplay>>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ClaimDisplay {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<crate::types::LanguageTag>,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_formats_deserialize_into_profiles() {
        let profile: ProfileConfiguration = serde_json::from_value(json!({
            "format": "mso_mdoc",
            "doctype": "org.iso.18013.5.1.mDL"
        }))
        .unwrap();
        assert_eq!(profile.format(), Some("mso_mdoc"));
        assert!(matches!(
            profile,
            ProfileConfiguration::Known(KnownProfileConfiguration::MsoMdoc(_))
        ));
    }

    #[test]
    fn unknown_formats_round_trip_verbatim() {
        let original = json!({
            "format": "ac_vc",
            "credential_definition": { "type": ["SomeVendorCredential"] }
        });
        let profile: ProfileConfiguration = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(profile.format(), Some("ac_vc"));
        assert_eq!(serde_json::to_value(&profile).unwrap(), original);
    }

    #[test]
    fn w3c_formats_are_not_requestable() {
        let profile: ProfileConfiguration = serde_json::from_value(json!({
            "format": "jwt_vc_json",
            "credential_definition": { "type": ["VerifiableCredential"] }
        }))
        .unwrap();
        assert!(matches!(
            profile.check_requestable(),
            Err(Error::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn claim_set_must_match_format() {
        let profile: ProfileConfiguration = serde_json::from_value(json!({
            "format": "dc+sd-jwt",
            "vct": "urn:eu.europa.ec.eudi:pid:1"
        }))
        .unwrap();

        let mdoc_claims: ClaimSet = ClaimSet::MsoMdoc(
            serde_json::from_value(json!({ "org.iso.18013.5.1": { "given_name": {} } })).unwrap(),
        );
        profile.encode_claim_set(&mdoc_claims).unwrap_err();
    }
}
