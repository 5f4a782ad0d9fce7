//! IETF SD-JWT Verifiable Credential format profile (`dc+sd-jwt`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ClaimMetadata;

pub const FORMAT_IDENTIFIER: &str = "dc+sd-jwt";

/// Claims offered in the credential: a name/value map where a value may itself be a
/// nested map or an array of nested maps.
pub type Claims<T> = HashMap<String, Box<MaybeNestedClaims<T>>>;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MaybeNestedClaims<T> {
    Object(Claims<T>),
    Array(Vec<Claims<T>>),
    Leaf(T),
}

/// Profile members of a `dc+sd-jwt` credential configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Configuration {
    vct: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<Claims<ClaimMetadata>>,
}

impl Configuration {
    pub fn new(vct: String) -> Self {
        Self {
            vct,
            credential_signing_alg_values_supported: None,
            claims: None,
        }
    }

    field_getters_setters![
        pub self [self] ["SD-JWT VC configuration value"] {
            set_vct -> vct[String],
            set_credential_signing_alg_values_supported -> credential_signing_alg_values_supported[Option<Vec<String>>],
            set_claims -> claims[Option<Claims<ClaimMetadata>>],
        }
    ];
}
