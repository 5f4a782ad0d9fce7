use base64::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use ssi_jwk::JWK;

use crate::error::{CryptoError, Error};

/// Contract for the pluggable JWS signing collaborator.
///
/// The key material stays behind this trait; the library only ever sees the public JWK
/// and detached signatures over the JWS signing input. Implementations must tolerate
/// concurrent invocation from distinct sessions.
pub trait JwsSigner: Send + Sync {
    /// JWS algorithm identifier the signatures are produced with, e.g. `ES256`.
    fn algorithm(&self) -> &str;

    /// Public key to embed in (or reference from) JOSE headers.
    fn public_jwk(&self) -> &JWK;

    /// Sign `header.payload` (both base64url-encoded) and return the raw signature bytes.
    fn sign(&self, signing_input: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// How the signing key is referenced from the JOSE header.
pub(crate) enum KeyBinding<'a> {
    /// Embed the signer's public JWK.
    Jwk,
    /// Reference the key through a `kid`.
    KeyId(&'a str),
    /// Neither; the recipient knows the key out-of-band.
    None,
}

#[derive(Serialize)]
struct JoseHeader<'a> {
    typ: &'a str,
    alg: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<JWK>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

/// Assemble and sign a compact JWT through the pluggable signer.
pub(crate) fn sign_jwt<C: Serialize>(
    typ: &str,
    key_binding: KeyBinding<'_>,
    claims: &C,
    signer: &dyn JwsSigner,
) -> Result<String, Error> {
    let (jwk, kid) = match key_binding {
        KeyBinding::Jwk => (Some(signer.public_jwk().to_public()), None),
        KeyBinding::KeyId(kid) => (None, Some(kid)),
        KeyBinding::None => (None, None),
    };
    let header = JoseHeader {
        typ,
        alg: signer.algorithm(),
        jwk,
        kid,
    };

    let encoded_header = BASE64_URL_SAFE_NO_PAD.encode(serialize_segment(&header)?);
    let encoded_claims = BASE64_URL_SAFE_NO_PAD.encode(serialize_segment(claims)?);
    let signing_input = [encoded_header, encoded_claims].join(".");

    let signature = signer.sign(signing_input.as_bytes())?;
    let encoded_signature = BASE64_URL_SAFE_NO_PAD.encode(signature);

    Ok([signing_input, encoded_signature].join("."))
}

fn serialize_segment<T: Serialize>(segment: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(segment).map_err(|e| Error::Validation {
        context: "JWT segment",
        reason: e.to_string(),
    })
}

/// Split a compact JWS and decode its header and claims without verifying the signature.
///
/// Signature verification is the [`SignedJwtVerifier`]'s job; this only exposes the
/// content for claim checks once (or before) the signature has been established.
pub(crate) fn decode_unverified(
    compact_jws: &str,
) -> Result<(Map<String, Value>, Map<String, Value>), Error> {
    let mut segments = compact_jws.split('.');
    let (Some(header), Some(claims), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::Validation {
            context: "JWT",
            reason: "expected three dot-separated segments".to_string(),
        });
    };

    Ok((decode_segment(header)?, decode_segment(claims)?))
}

fn decode_segment(segment: &str) -> Result<Map<String, Value>, Error> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::Validation {
            context: "JWT segment",
            reason: e.to_string(),
        })?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Validation {
            context: "JWT segment",
            reason: "expected a JSON object".to_string(),
        }),
        Err(e) => Err(Error::Validation {
            context: "JWT segment",
            reason: e.to_string(),
        }),
    }
}

/// Random URL-safe token for `jti` claims and similar one-shot identifiers.
pub(crate) fn random_token() -> String {
    BASE64_URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>())
}
