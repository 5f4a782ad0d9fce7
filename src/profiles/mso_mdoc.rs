//! ISO/IEC 18013-5 mdoc format profile (`mso_mdoc`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ClaimMetadata;

pub const FORMAT_IDENTIFIER: &str = "mso_mdoc";

pub type Namespace = String;
pub type DataElementIdentifier = String;

/// Claims grouped per mdoc namespace.
pub type Claims<T> = HashMap<Namespace, HashMap<DataElementIdentifier, T>>;

/// Profile members of an `mso_mdoc` credential configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Configuration {
    doctype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<Claims<ClaimMetadata>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order: Option<Vec<String>>,
}

impl Configuration {
    pub fn new(doctype: String) -> Self {
        Self {
            doctype,
            credential_signing_alg_values_supported: None,
            claims: None,
            order: None,
        }
    }

    field_getters_setters![
        pub self [self] ["mdoc configuration value"] {
            set_doctype -> doctype[String],
            set_credential_signing_alg_values_supported -> credential_signing_alg_values_supported[Option<Vec<String>>],
            set_claims -> claims[Option<Claims<ClaimMetadata>>],
            set_order -> order[Option<Vec<String>>],
        }
    ];
}
