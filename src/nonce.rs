//! Nonce endpoint: an unauthenticated POST returning a fresh `c_nonce`, used to
//! populate the proof-required state ahead of a credential request.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{
    error::Error,
    http::{self, HttpClient},
    types::{CNonce, NonceUrl},
};

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NonceResponse {
    pub c_nonce: String,
    pub c_nonce_expires_in: Option<u64>,
}

/// Request a fresh `c_nonce` from the issuer's nonce endpoint.
pub(crate) async fn request_nonce<C: HttpClient>(
    http_client: &C,
    nonce_endpoint: &NonceUrl,
) -> Result<CNonce, Error> {
    let request = http::json_post_request(nonce_endpoint.url(), &serde_json::json!({}), vec![])?;
    let response = http_client.execute(request).await?;

    if !response.status().is_success() {
        return Err(http::unexpected_status(&response).into());
    }
    let nonce: NonceResponse = http::decode_json(response.body())?;
    CNonce::new(nonce.c_nonce, nonce.c_nonce_expires_in)
}
