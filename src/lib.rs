//! Wallet-side client for OpenID for Verifiable Credential Issuance (draft 15).
//!
//! The crate covers the issuance state machine — credential offer resolution, issuer and
//! authorization server discovery, authorization code (PKCE, optional PAR) and
//! pre-authorized code grants, DPoP with nonce recovery, Attestation-Based Client
//! Authentication, proof-of-possession JWTs, credential response encryption, deferred
//! issuance and notifications.
//!
//! HTTP transport and JOSE primitives are pluggable collaborators: implement
//! [`http::HttpClient`] for your HTTP stack and [`jose::JwsSigner`] (plus, as needed,
//! [`metadata::SignedJwtVerifier`], [`response_encryption::ResponseEncryptionProvider`])
//! for your crypto stack.

#[macro_use]
mod macros;

pub mod authorization;
pub mod client;
pub mod client_auth;
pub mod credential;
pub mod credential_offer;
pub mod dpop;
pub mod error;
pub mod http;
pub mod jose;
pub mod metadata;
pub mod nonce;
pub mod notification;
pub mod profiles;
pub mod proof_of_possession;
pub mod response_encryption;
pub mod token;
pub mod types;

pub use authorization::{
    AuthorizedRequest, BoundAuthorizationCode, PreparedAuthorizationRequest, TokenSet,
};
pub use client::{AuthorizePreference, Client, Config};
pub use client_auth::{ClientAttestationProvider, ClientAuth};
pub use credential::{DeferredOutcome, IssuanceRequestPayload, IssuedCredential, SubmissionOutcome};
pub use credential_offer::{CredentialOffer, CredentialOfferObject, CredentialOfferRequest};
pub use error::{CryptoError, Error, TransportError};
pub use http::HttpClient;
pub use jose::JwsSigner;
pub use metadata::{
    AuthorizationServerMetadata, CredentialIssuerMetadata, IssuerMetadataPolicy, MetadataTrust,
};
pub use token::TokenType;
pub use types::{CNonce, CredentialConfigurationId, CredentialIssuerId};

// The OAuth2 vocabulary types (ClientId, RedirectUrl, Scope, ...) come from `oauth2`.
pub use oauth2;
