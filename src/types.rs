use std::fmt::{Debug, Error as FormatterError, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::Error;

macro_rules! new_type {
    // Convenience pattern without an impl.
    (
        $(#[$attr:meta])*
        $name:ident(
            $(#[$type_attr:meta])*
            $type:ty
        )
    ) => {
        new_type![
            $(#[$attr])*
            $name(
                $(#[$type_attr])*
                $type
            )
            impl {}
        ];
    };
    // Main entry point with an impl.
    (
        $(#[$attr:meta])*
        $name:ident(
            $(#[$type_attr:meta])*
            $type:ty
        )
        impl {
            $($item:tt)*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Debug, PartialEq)]
        pub struct $name(
            $(#[$type_attr])*
            $type
        );
        impl $name {
            $($item)*

            #[doc = concat!("Create a new `", stringify!($name), "` to wrap the given `", stringify!($type), "`.")]
            pub const fn new(s: $type) -> Self {
                $name(s)
            }
        }
        impl Deref for $name {
            type Target = $type;
            fn deref(&self) -> &$type {
                &self.0
            }
        }
        impl From<$name> for $type {
            fn from(s: $name) -> $type {
                s.0
            }
        }
    }
}

macro_rules! new_secret_type {
    (
        $(#[$attr:meta])*
        $name:ident($type:ty)
    ) => {
        new_secret_type![
            $(#[$attr])*
            $name($type)
            impl {}
        ];
    };
    (
        $(#[$attr:meta])*
        $name:ident($type:ty)
        impl {
            $($item:tt)*
        }
    ) => {
        $(
            #[$attr]
        )*
        pub struct $name($type);
        impl $name {
            $($item)*

            #[doc = concat!("Create a new `", stringify!($name), "` to wrap the given `", stringify!($type), "`.")]
            pub fn new(s: $type) -> Self {
                $name(s)
            }
            #[doc = concat!("Get the secret contained within this `", stringify!($name), "`.")]
            ///
            /// # Security Warning
            ///
            /// Leaking this value may compromise the security of the issuance flow.
            pub fn secret(&self) -> &$type { &self.0 }
        }
        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter) -> Result<(), FormatterError> {
                write!(f, concat!(stringify!($name), "([redacted])"))
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Sha256::digest(&self.0) == Sha256::digest(&other.0)
            }
        }

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                Sha256::digest(&self.0).hash(state)
            }
        }
    };
}

///
/// Creates a URL-specific new type
///
/// Types created by this macro enforce during construction that the contained value represents a
/// syntactically valid URL. However, comparisons and hashes of these types are based on the string
/// representation given during construction, disregarding any canonicalization performed by the
/// underlying `Url` struct. The issuance protocol requires certain URLs (e.g., issuer
/// identifiers) to be compared exactly, without canonicalization.
///
macro_rules! new_url_type {
    // Convenience pattern without an impl.
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        new_url_type![
            $(#[$attr])*
            $name
            impl {}
        ];
    };
    // Main entry point with an impl.
    (
        $(#[$attr:meta])*
        $name:ident
        impl {
            $($item:tt)*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone)]
        pub struct $name(Url, String);
        impl $name {
            #[doc = concat!("Create a new `", stringify!($name), "` from a `String` to wrap a URL.")]
            pub fn new(url: String) -> Result<Self, ::url::ParseError> {
                Ok($name(Url::parse(&url)?, url))
            }
            #[doc = concat!("Create a new `", stringify!($name), "` from a `Url` to wrap a URL.")]
            pub fn from_url(url: Url) -> Self {
                let s = url.to_string();
                Self(url, s)
            }
            #[doc = concat!("Return this `", stringify!($name), "` as a parsed `Url`.")]
            pub fn url(&self) -> &Url {
                &self.0
            }
            $($item)*
        }
        impl Deref for $name {
            type Target = String;
            fn deref(&self) -> &String {
                &self.1
            }
        }
        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> Result<(), ::std::fmt::Error> {
                let mut debug_trait_builder = f.debug_tuple(stringify!($name));
                debug_trait_builder.field(&self.1);
                debug_trait_builder.finish()
            }
        }
        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: ::serde::de::Deserializer<'de>,
            {
                struct UrlVisitor;
                impl<'de> ::serde::de::Visitor<'de> for UrlVisitor {
                    type Value = $name;

                    fn expecting(
                        &self,
                        formatter: &mut ::std::fmt::Formatter
                    ) -> ::std::fmt::Result {
                        formatter.write_str(stringify!($name))
                    }

                    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
                    where
                        E: ::serde::de::Error,
                    {
                        $name::new(v.to_string()).map_err(E::custom)
                    }
                }
                deserializer.deserialize_str(UrlVisitor {})
            }
        }
        impl ::serde::Serialize for $name {
            fn serialize<SE>(&self, serializer: SE) -> Result<SE::Ok, SE::Error>
            where
                SE: ::serde::Serializer,
            {
                serializer.serialize_str(&self.1)
            }
        }
        impl ::std::hash::Hash for $name {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) -> () {
                ::std::hash::Hash::hash(&(self.1), state);
            }
        }
        impl PartialEq for $name {
            fn eq(&self, other: &$name) -> bool {
                self.1 == other.1
            }
        }
        impl Eq for $name {}
    };
}

/// Identifier of a Credential Issuer: an absolute HTTPS URL without query, fragment or
/// trailing path slash, compared by its exact string representation.
#[derive(Clone)]
pub struct CredentialIssuerId(Url, String);

impl CredentialIssuerId {
    /// Parse and validate a Credential Issuer identifier.
    pub fn new(url: String) -> Result<Self, Error> {
        let parsed = Url::parse(&url).map_err(|e| Error::Validation {
            context: "credential issuer identifier",
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "https" {
            return Err(Error::Validation {
                context: "credential issuer identifier",
                reason: format!("scheme must be https, found {}", parsed.scheme()),
            });
        }
        if parsed.query().is_some() {
            return Err(Error::Validation {
                context: "credential issuer identifier",
                reason: "must not contain a query component".to_string(),
            });
        }
        if parsed.fragment().is_some() {
            return Err(Error::Validation {
                context: "credential issuer identifier",
                reason: "must not contain a fragment component".to_string(),
            });
        }
        if url.ends_with('/') {
            return Err(Error::Validation {
                context: "credential issuer identifier",
                reason: "path must not end with a slash".to_string(),
            });
        }
        Ok(Self(parsed, url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Parse a string as a URL, with this identifier as the base URL.
    pub fn join(&self, suffix: &str) -> Result<Url, url::ParseError> {
        Url::parse(&(self.1.clone() + "/" + suffix))
    }
}

impl Deref for CredentialIssuerId {
    type Target = String;
    fn deref(&self) -> &String {
        &self.1
    }
}

impl Debug for CredentialIssuerId {
    fn fmt(&self, f: &mut Formatter) -> Result<(), FormatterError> {
        f.debug_tuple("CredentialIssuerId").field(&self.1).finish()
    }
}

impl PartialEq for CredentialIssuerId {
    fn eq(&self, other: &Self) -> bool {
        self.1 == other.1
    }
}
impl Eq for CredentialIssuerId {}

impl Hash for CredentialIssuerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.1.hash(state)
    }
}

impl<'de> Deserialize<'de> for CredentialIssuerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for CredentialIssuerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.1)
    }
}

new_url_type![
    /// Issuer identifier URL of an OAuth 2.0 Authorization Server.
    IssuerUrl
    impl {
        /// Parse a string as a URL, with this URL as the base URL.
        pub fn join(&self, suffix: &str) -> Result<Url, url::ParseError> {
            if let Some('/') = self.1.chars().next_back() {
                Url::parse(&(self.1.clone() + suffix))
            } else {
                Url::parse(&(self.1.clone() + "/" + suffix))
            }
        }
    }
];

new_url_type![
    /// URL of the Credential Issuer's Credential Endpoint.
    CredentialUrl
];

new_url_type![
    /// URL of the Credential Issuer's Batch Credential Endpoint.
    BatchCredentialUrl
];

new_url_type![
    /// URL of the Credential Issuer's Deferred Credential Endpoint.
    DeferredCredentialUrl
];

new_url_type![
    /// URL of the Credential Issuer's Nonce Endpoint.
    NonceUrl
];

new_url_type![
    /// URL of the Credential Issuer's Notification Endpoint.
    NotificationUrl
];

new_url_type![
    /// URL of the Pushed Authorization Request Endpoint.
    ParUrl
];

new_url_type![
    /// URL of the authorization server's JWK Set document
    /// (see [RFC7517](https://datatracker.ietf.org/doc/html/rfc7517)).
    JsonWebKeySetUrl
];

new_url_type![
    /// A URI where the Wallet can obtain the logo of the Credential from the Credential Issuer.
    /// The Wallet needs to determine the scheme, since the URI value could use the `https:` scheme,
    /// the `data:` scheme, etc.
    LogoUri
];

new_type![
    /// Identifier of an entry in `credential_configurations_supported`.
    #[derive(Deserialize, Serialize, Eq, Hash)]
    CredentialConfigurationId(String)
];

new_type![
    /// String value that identifies the language of this object represented as a language tag taken
    /// from values defined in [BCP47 (RFC5646)](https://www.rfc-editor.org/rfc/rfc5646.html).
    #[derive(Deserialize, Serialize, Eq, Hash)]
    LanguageTag(String)
];

new_type![
    /// Identifier of a deferred issuance transaction, issued by the Credential Endpoint.
    #[derive(Deserialize, Serialize, Eq, Hash)]
    TransactionId(String)
];

new_type![
    /// Identifier the issuer assigned to the issuance for use at the Notification Endpoint.
    #[derive(Deserialize, Serialize, Eq, Hash)]
    NotificationId(String)
];

new_secret_type![
    #[derive(Deserialize, Serialize, Clone)]
    PreAuthorizedCode(String)
];

new_secret_type![
    #[derive(Deserialize, Serialize, Clone)]
    IssuerState(String)
];

new_secret_type![
    #[derive(Deserialize, Serialize, Clone)]
    TxCode(String)
];

/// Server-issued nonce to be bound into a proof-of-possession JWT.
///
/// The lifetime is reported by the server in seconds and is carried along verbatim; when the
/// server omits it, no default is assumed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CNonce {
    nonce: String,
    expires_in: Option<Duration>,
}

impl CNonce {
    pub fn new(nonce: String, expires_in_seconds: Option<u64>) -> Result<Self, Error> {
        if nonce.is_empty() {
            return Err(Error::Validation {
                context: "c_nonce",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(Self {
            nonce,
            expires_in: expires_in_seconds.map(Duration::from_secs),
        })
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_in
    }
}

/// Nonce supplied by a server through the `DPoP-Nonce` response header.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DpopNonce(String);

impl DpopNonce {
    pub fn new(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for DpopNonce {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
