//! Discovery of Credential Issuer and Authorization Server metadata.
//!
//! Both resolvers are pure over their inputs; caching, if any, is the caller's concern.

use url::Url;

use crate::{
    error::Error,
    http::{self, HttpClient, HttpResponse},
};

pub mod authorization_server;
pub mod credential_issuer;

pub use authorization_server::{AuthorizationServerMetadata, GrantType};
pub use credential_issuer::{
    CredentialConfiguration, CredentialIssuerMetadata, IssuerMetadataPolicy, MetadataTrust,
    MetadataTrustPolicy, SignedJwtVerifier,
};

/// Fetch a well-known metadata document, expecting a JSON body on HTTP 200.
pub(crate) async fn fetch_document<C: HttpClient>(
    http_client: &C,
    discovery_url: &Url,
) -> Result<HttpResponse, Error> {
    let response = http_client
        .execute(http::json_get_request(discovery_url)?)
        .await?;

    if !response.status().is_success() {
        return Err(Error::MetadataInvalid {
            reason: format!(
                "HTTP status code {} at {}",
                response.status(),
                discovery_url
            ),
        });
    }
    http::check_content_type(response.headers(), http::MIME_TYPE_JSON)?;

    Ok(response)
}
