use std::future::Future;

use oauth2::http::{
    self,
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method,
};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{
    error::{Error, ErrorResponse, TransportError},
    types::DpopNonce,
};

pub type HttpRequest = http::Request<Vec<u8>>;
pub type HttpResponse = http::Response<Vec<u8>>;

pub const MIME_TYPE_JSON: &str = "application/json";
pub const MIME_TYPE_FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MIME_TYPE_JWT: &str = "application/jwt";

pub const DPOP_NONCE_HEADER_NAME: &str = "DPoP-Nonce";

/// Contract for the pluggable HTTP transport.
///
/// Implementations perform the exchange and report transport-level failures through
/// [`TransportError`]; any response that was received, whatever its status code, is
/// returned as-is so protocol layers can inspect status, headers and body themselves.
/// Implementations must tolerate concurrent invocation from distinct sessions.
pub trait HttpClient {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>>;
}

pub(crate) fn json_get_request(url: &Url) -> Result<HttpRequest, Error> {
    http::Request::builder()
        .uri(url.to_string())
        .method(Method::GET)
        .header(ACCEPT, HeaderValue::from_static(MIME_TYPE_JSON))
        .body(Vec::new())
        .map_err(request_build_error)
}

pub(crate) fn form_post_request<T: Serialize>(
    url: &Url,
    form: &T,
    headers: Vec<(HeaderName, HeaderValue)>,
) -> Result<HttpRequest, Error> {
    let body = serde_urlencoded::to_string(form).map_err(|e| Error::Validation {
        context: "request body",
        reason: e.to_string(),
    })?;

    let mut builder = http::Request::builder()
        .uri(url.to_string())
        .method(Method::POST)
        .header(ACCEPT, HeaderValue::from_static(MIME_TYPE_JSON))
        .header(
            CONTENT_TYPE,
            HeaderValue::from_static(MIME_TYPE_FORM_URLENCODED),
        );
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(body.into_bytes()).map_err(request_build_error)
}

pub(crate) fn json_post_request<T: Serialize>(
    url: &Url,
    body: &T,
    headers: Vec<(HeaderName, HeaderValue)>,
) -> Result<HttpRequest, Error> {
    let body = serde_json::to_vec(body).map_err(|e| Error::Validation {
        context: "request body",
        reason: e.to_string(),
    })?;

    let mut builder = http::Request::builder()
        .uri(url.to_string())
        .method(Method::POST)
        .header(ACCEPT, HeaderValue::from_static(MIME_TYPE_JSON))
        .header(CONTENT_TYPE, HeaderValue::from_static(MIME_TYPE_JSON));
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(body).map_err(request_build_error)
}

fn request_build_error(e: http::Error) -> Error {
    Error::Validation {
        context: "request",
        reason: e.to_string(),
    }
}

// The essence (https://mimesniff.spec.whatwg.org/#mime-type-essence) is the
// <type>/<subtype> representation, stripped of parameters such as charset.
pub(crate) fn content_type_has_essence(headers: &HeaderMap, expected_essence: &str) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|content_type| content_type.to_str().ok())
        .filter(|ct| ct[..ct.find(';').unwrap_or(ct.len())].eq_ignore_ascii_case(expected_essence))
        .is_some()
}

pub(crate) fn check_content_type(headers: &HeaderMap, expected_essence: &str) -> Result<(), Error> {
    // Media types are case insensitive and may be followed by parameters,
    // see https://tools.ietf.org/html/rfc7231#section-3.1.1.1. An absent
    // Content-Type is tolerated.
    match headers.get(CONTENT_TYPE) {
        None => Ok(()),
        Some(content_type) if content_type_has_essence(headers, expected_essence) => Ok(()),
        Some(content_type) => Err(Error::Validation {
            context: "response Content-Type",
            reason: format!("{content_type:?}, expected `{expected_essence}`"),
        }),
    }
}

/// Decode a JSON body, reporting the path of the offending field on failure.
pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, TransportError> {
    serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(body))
        .map_err(TransportError::Decode)
}

/// Decode the body of a non-2xx response as a structured OAuth error document, if it is one.
pub(crate) fn error_response<C: DeserializeOwned>(
    response: &HttpResponse,
) -> Option<ErrorResponse<C>> {
    if response.status().is_success() {
        return None;
    }
    serde_json::from_slice(response.body()).ok()
}

pub(crate) fn unexpected_status(response: &HttpResponse) -> TransportError {
    TransportError::UnexpectedStatus {
        status: response.status(),
        body: response.body().clone(),
    }
}

/// Extract a `DPoP-Nonce` value from a response, success or failure alike.
pub(crate) fn dpop_nonce_header(response: &HttpResponse) -> Option<DpopNonce> {
    response
        .headers()
        .get(DPOP_NONCE_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(|value| DpopNonce::new(value.to_string()))
}
