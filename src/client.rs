//! The issuance client: a thin orchestrator over the authorization and issuance
//! endpoints of one resolved credential offer.
//!
//! The client itself is immutable; all per-session progress lives in the state values
//! ([`PreparedAuthorizationRequest`], [`BoundAuthorizationCode`], [`AuthorizedRequest`])
//! that its operations consume and return. The only shared mutable state is the DPoP
//! nonce cell inside the engine, serialized under its own lock.

use std::sync::Arc;

use oauth2::http::header::{HeaderName, HeaderValue};
use oauth2::http::Method;
use oauth2::{CsrfToken, PkceCodeChallenge, RedirectUrl, Scope};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::{
    authorization::{
        AuthorizationDetail, AuthorizationRequestParameters, AuthorizedRequest,
        BoundAuthorizationCode, PreparedAuthorizationRequest, PushedAuthorizationResponse,
    },
    client_auth::ClientAuth,
    credential::{
        CredentialErrorResponse, CredentialRequest, CredentialResponse,
        DeferredCredentialRequest, DeferredOutcome, IssuanceRequestPayload, SubmissionOutcome,
    },
    credential_offer::{
        AuthorizationCodeGrant, CredentialOffer, CredentialOfferRequest, Grants,
        OfferedCredentialAccess,
    },
    dpop::{self, Dpop, DpopEngine},
    error::{CredentialErrorCode, Error, TokenErrorCode},
    http::{self, HttpClient, HttpResponse},
    jose::JwsSigner,
    metadata::IssuerMetadataPolicy,
    nonce,
    notification::{NotificationEvent, NotificationRequest},
    proof_of_possession::{self, Proof, Proofs},
    response_encryption::{ResponseEncryption, ResponseEncryptionProvider},
    token::{TokenRequest, TokenRequestGrantType, TokenResponse, TokenType},
    types::{CNonce, DpopNonce, TransactionId, TxCode},
};

/// Whether authorization is requested through scopes or `authorization_details` for
/// configurations that expose both.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthorizePreference {
    #[default]
    FavorScopes,
    FavorAuthorizationDetails,
}

/// Client configuration, fixed for the lifetime of a [`Client`].
#[derive(Clone)]
pub struct Config {
    client: ClientAuth,
    redirect_uri: RedirectUrl,
    authorize_preference: AuthorizePreference,
    use_par: bool,
    dpop_signer: Option<Arc<dyn JwsSigner>>,
    issuer_metadata_policy: IssuerMetadataPolicy,
}

impl Config {
    pub fn new(client: ClientAuth, redirect_uri: RedirectUrl) -> Self {
        Self {
            client,
            redirect_uri,
            authorize_preference: AuthorizePreference::default(),
            use_par: true,
            dpop_signer: None,
            issuer_metadata_policy: IssuerMetadataPolicy::default(),
        }
    }

    field_getters_setters![
        pub self [self] ["client configuration value"] {
            set_client -> client[ClientAuth],
            set_redirect_uri -> redirect_uri[RedirectUrl],
            set_dpop_signer -> dpop_signer[Option<Arc<dyn JwsSigner>>],
            set_issuer_metadata_policy -> issuer_metadata_policy[IssuerMetadataPolicy],
        }
    ];

    pub fn authorize_preference(&self) -> AuthorizePreference {
        self.authorize_preference
    }

    pub fn set_authorize_preference(mut self, authorize_preference: AuthorizePreference) -> Self {
        self.authorize_preference = authorize_preference;
        self
    }

    pub fn use_par(&self) -> bool {
        self.use_par
    }

    pub fn set_use_par(mut self, use_par: bool) -> Self {
        self.use_par = use_par;
        self
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("client", &self.client)
            .field("redirect_uri", &self.redirect_uri)
            .field("authorize_preference", &self.authorize_preference)
            .field("use_par", &self.use_par)
            .field("dpop", &self.dpop_signer.is_some())
            .finish_non_exhaustive()
    }
}

/// Issuance client bound to one resolved credential offer.
pub struct Client {
    config: Config,
    offer: CredentialOffer,
    dpop: Option<DpopEngine>,
}

impl Client {
    /// Build a client over an already resolved offer.
    pub fn from_offer(offer: CredentialOffer, config: Config) -> Result<Self, Error> {
        let dpop = match &config.dpop_signer {
            Some(signer) => {
                let engine = DpopEngine::new(Arc::clone(signer));
                engine.check_algorithm(offer.authorization_metadata())?;
                Some(engine)
            }
            None => None,
        };
        Ok(Self {
            config,
            offer,
            dpop,
        })
    }

    /// Resolve the offer request and build a client for it.
    pub async fn resolve_offer<C: HttpClient>(
        http_client: &C,
        request: CredentialOfferRequest,
        config: Config,
    ) -> Result<Self, Error> {
        let offer =
            CredentialOffer::resolve(http_client, request, &config.issuer_metadata_policy).await?;
        Self::from_offer(offer, config)
    }

    pub fn offer(&self) -> &CredentialOffer {
        &self.offer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The DPoP nonce currently held, for callers persisting an interrupted session.
    pub fn dpop_nonce(&self) -> Option<DpopNonce> {
        self.dpop.as_ref().and_then(DpopEngine::current_nonce)
    }

    /// Restore a persisted DPoP nonce into the engine.
    pub fn restore_dpop_nonce(&self, nonce: DpopNonce) {
        if let Some(engine) = &self.dpop {
            engine.seed_nonce(nonce);
        }
    }

    /// Prepare the authorization request: PKCE material, scope and/or
    /// `authorization_details` content, and a pushed authorization request when the
    /// server offers (or demands) one.
    ///
    /// `wallet_state` overrides the randomly generated `state` parameter.
    pub async fn prepare_authorization_request<C: HttpClient>(
        &self,
        http_client: &C,
        wallet_state: Option<CsrfToken>,
    ) -> Result<PreparedAuthorizationRequest, Error> {
        let authorization_metadata = self.offer.authorization_metadata();

        let issuer_state = self
            .offer
            .grants()
            .and_then(Grants::authorization_code)
            .and_then(AuthorizationCodeGrant::issuer_state);

        let (scopes, details) = self.authorization_request_content();
        let scope = (!scopes.is_empty()).then(|| {
            scopes
                .iter()
                .map(|scope| scope.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        });
        let authorization_details = if details.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&details).map_err(|e| Error::Validation {
                    context: "authorization_details",
                    reason: e.to_string(),
                })?,
            )
        };

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let state = wallet_state.unwrap_or_else(CsrfToken::new_random);

        let parameters = AuthorizationRequestParameters {
            response_type: "code",
            client_id: self.config.client.client_id().as_str(),
            redirect_uri: self.config.redirect_uri.as_str(),
            state: state.secret(),
            code_challenge: pkce_challenge.as_str(),
            code_challenge_method: "S256",
            scope,
            authorization_details,
            issuer_state: issuer_state.map(|state| state.secret().as_str()),
        };

        let authorization_endpoint = authorization_metadata.authorization_endpoint().url();
        let par_endpoint = authorization_metadata.pushed_authorization_request_endpoint();
        let use_par = self.config.use_par
            || authorization_metadata.require_pushed_authorization_requests();

        let (authorization_url, request_uri) = match par_endpoint {
            Some(par_endpoint) if use_par => {
                let pushed = self
                    .push_authorization_request(http_client, par_endpoint.url(), &parameters)
                    .await?;

                let mut url = authorization_endpoint.clone();
                url.query_pairs_mut()
                    .append_pair("client_id", self.config.client.client_id().as_str())
                    .append_pair("request_uri", pushed.request_uri.as_str())
                    .append_pair("state", state.secret());
                (url, Some(pushed.request_uri))
            }
            _ => {
                let query =
                    serde_urlencoded::to_string(&parameters).map_err(|e| Error::Validation {
                        context: "authorization request",
                        reason: e.to_string(),
                    })?;
                let mut url = authorization_endpoint.clone();
                match url.query() {
                    None => url.set_query(Some(&query)),
                    Some(existing) => {
                        let combined = format!("{existing}&{query}");
                        url.set_query(Some(&combined));
                    }
                }
                (url, None)
            }
        };

        Ok(PreparedAuthorizationRequest {
            authorization_url,
            request_uri,
            state,
            pkce_verifier,
            configuration_ids: self
                .offer
                .credentials()
                .iter()
                .map(|offered| offered.configuration_id.clone())
                .collect(),
        })
    }

    /// Redeem a bound authorization code at the token endpoint.
    pub async fn exchange_authorization_code<C: HttpClient>(
        &self,
        http_client: &C,
        bound: BoundAuthorizationCode,
    ) -> Result<AuthorizedRequest, Error> {
        let BoundAuthorizationCode {
            code,
            pkce_verifier,
        } = bound;

        let request = TokenRequest {
            grant_type: TokenRequestGrantType::AuthorizationCode { code },
            code_verifier: Some(pkce_verifier.secret().clone()),
            client_id: Some(self.config.client.client_id().clone()),
            redirect_uri: Some(self.config.redirect_uri.clone()),
        };

        let response = self.send_token_request(http_client, &request).await?;
        AuthorizedRequest::from_token_response(response)
    }

    /// Redeem a pre-authorized code, with the transaction code when the offer demands
    /// one. Validation failures surface before any network call.
    pub async fn authorize_with_pre_authorized_code<C: HttpClient>(
        &self,
        http_client: &C,
        tx_code: Option<TxCode>,
    ) -> Result<AuthorizedRequest, Error> {
        let grant = self
            .offer
            .grants()
            .and_then(Grants::pre_authorized_code)
            .ok_or_else(|| Error::OfferInvalid {
                reason: "offer carries no pre-authorized_code grant".to_string(),
            })?;

        match (grant.tx_code(), &tx_code) {
            (Some(definition), Some(code)) => definition.validate(code)?,
            (Some(_), None) => {
                return Err(Error::Validation {
                    context: "tx_code",
                    reason: "required by the offer but not supplied".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(Error::Validation {
                    context: "tx_code",
                    reason: "supplied but the offer does not define one".to_string(),
                })
            }
            (None, None) => {}
        }

        let request = TokenRequest {
            grant_type: TokenRequestGrantType::PreAuthorizedCode {
                pre_authorized_code: grant.pre_authorized_code().clone(),
                tx_code,
            },
            code_verifier: None,
            client_id: Some(self.config.client.client_id().clone()),
            redirect_uri: None,
        };

        let response = self.send_token_request(http_client, &request).await?;
        AuthorizedRequest::from_token_response(response)
    }

    /// Exchange the held refresh token for a fresh token set, preserving the DPoP
    /// binding and the proof-required state.
    pub async fn refresh<C: HttpClient>(
        &self,
        http_client: &C,
        authorized: AuthorizedRequest,
    ) -> Result<AuthorizedRequest, Error> {
        let Some(refresh_token) = authorized.refresh_token().cloned() else {
            return Err(Error::Validation {
                context: "refresh",
                reason: "no refresh token held".to_string(),
            });
        };

        let request = TokenRequest {
            grant_type: TokenRequestGrantType::RefreshToken { refresh_token },
            code_verifier: None,
            client_id: Some(self.config.client.client_id().clone()),
            redirect_uri: None,
        };

        let response = self.send_token_request(http_client, &request).await?;
        authorized.refreshed(response)
    }

    /// Proactively fetch a `c_nonce` from the issuer's nonce endpoint, transitioning
    /// the state to proof-required.
    pub async fn refresh_proof_nonce<C: HttpClient>(
        &self,
        http_client: &C,
        authorized: AuthorizedRequest,
    ) -> Result<AuthorizedRequest, Error> {
        let endpoint = self
            .offer
            .issuer_metadata()
            .nonce_endpoint()
            .ok_or(Error::UnsupportedFeature("nonce endpoint"))?;

        let c_nonce = nonce::request_nonce(http_client, endpoint).await?;
        Ok(authorized.with_c_nonce(c_nonce))
    }

    /// Submit one credential request.
    ///
    /// `proof_signers` supplies one key per requested credential instance; with a single
    /// signer a `proof` member is emitted, with several the batch `proofs` member.
    /// Response encryption is negotiated through `encryption_provider` whenever the
    /// issuer supports it, and is mandatory when the issuer requires it.
    pub async fn request_credential<C: HttpClient>(
        &self,
        http_client: &C,
        authorized: AuthorizedRequest,
        payload: &IssuanceRequestPayload,
        proof_signers: &[&dyn JwsSigner],
        encryption_provider: Option<&dyn ResponseEncryptionProvider>,
    ) -> Result<(AuthorizedRequest, SubmissionOutcome), Error> {
        let issuer_metadata = self.offer.issuer_metadata();

        let (configuration_id, claim_set) = match payload {
            IssuanceRequestPayload::ConfigurationBased {
                credential_configuration_id,
                claim_set,
            } => (credential_configuration_id, claim_set.as_ref()),
            IssuanceRequestPayload::IdentifierBased { .. } => {
                return Err(Error::UnsupportedFeature(
                    "identifier-based issuance requests",
                ))
            }
        };

        let configuration =
            issuer_metadata
                .configuration(configuration_id)
                .ok_or_else(|| Error::Validation {
                    context: "credential configuration",
                    reason: format!(
                        "`{}` is not supported by the issuer",
                        configuration_id.as_str()
                    ),
                })?;
        configuration.profile().check_requestable()?;

        let claims = claim_set
            .map(|claim_set| configuration.profile().encode_claim_set(claim_set))
            .transpose()?;

        if matches!(authorized, AuthorizedRequest::ProofRequired { .. })
            && proof_signers.is_empty()
        {
            return Err(Error::Validation {
                context: "proof signers",
                reason: "issuer requires a proof of possession but none were supplied"
                    .to_string(),
            });
        }
        if let Some(supported) = proof_of_possession::jwt_proof_algorithms(
            configuration.proof_types_supported(),
        ) {
            for signer in proof_signers {
                if !supported.iter().any(|alg| alg == signer.algorithm()) {
                    return Err(Error::Validation {
                        context: "proof signers",
                        reason: format!(
                            "algorithm {} is not accepted for this credential",
                            signer.algorithm()
                        ),
                    });
                }
            }
        }

        let mut proof_jwts = proof_signers
            .iter()
            .map(|signer| {
                proof_of_possession::jwt_proof(
                    *signer,
                    self.config.client.client_id(),
                    self.offer.credential_issuer(),
                    authorized.c_nonce(),
                )
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let (proof, proofs) = match proof_jwts.len() {
            0 => (None, None),
            1 => (Some(Proof::Jwt { jwt: proof_jwts.remove(0) }), None),
            _ => (None, Some(Proofs { jwt: Some(proof_jwts) })),
        };

        let encryption = self.negotiate_response_encryption(encryption_provider)?;

        let body = CredentialRequest {
            credential_configuration_id: Some(configuration_id.clone()),
            claims,
            proof,
            proofs,
            credential_response_encryption: encryption
                .as_ref()
                .map(ResponseEncryption::request_parameters),
        };

        let endpoint = issuer_metadata.credential_endpoint().url().clone();
        let response = self
            .send_authorized_json(http_client, &authorized, &endpoint, &body)
            .await?;

        interpret_credential_response(authorized, response, encryption.as_ref())
    }

    /// Poll the deferred endpoint for a previously deferred issuance.
    ///
    /// Repeating the call with the same `transaction_id` is safe; the state only
    /// progresses from pending to issued or failed.
    pub async fn query_deferred<C: HttpClient>(
        &self,
        http_client: &C,
        authorized: AuthorizedRequest,
        transaction_id: &TransactionId,
    ) -> Result<(AuthorizedRequest, DeferredOutcome), Error> {
        let endpoint = self
            .offer
            .issuer_metadata()
            .deferred_credential_endpoint()
            .ok_or(Error::UnsupportedFeature("deferred credential endpoint"))?
            .url()
            .clone();

        let body = DeferredCredentialRequest {
            transaction_id: transaction_id.clone(),
        };
        let response = self
            .send_authorized_json(http_client, &authorized, &endpoint, &body)
            .await?;

        if response.status().is_success() {
            // Some deployments answer pending polls with 202 and an error-shaped body.
            let value: Value = http::decode_json(response.body())?;
            if value.get("error").is_some() {
                let error: CredentialErrorResponse = http::decode_json(response.body())?;
                return Ok((authorized, deferred_failure(error)));
            }
            let parsed: CredentialResponse = http::decode_json(response.body())?;
            let authorized =
                authorized.apply_c_nonce(parsed.c_nonce.clone(), parsed.c_nonce_expires_in)?;
            let credentials = parsed.issued_credentials();
            return Ok((
                authorized,
                DeferredOutcome::Issued {
                    credentials,
                    notification_id: parsed.notification_id,
                },
            ));
        }

        match serde_json::from_slice::<CredentialErrorResponse>(response.body()) {
            Ok(error) => Ok((authorized, deferred_failure(error))),
            Err(_) => Err(http::unexpected_status(&response).into()),
        }
    }

    /// Report the fate of an issued credential to the issuer's notification endpoint.
    ///
    /// Failures are surfaced but carry no consequence for the issuance itself.
    pub async fn notify<C: HttpClient>(
        &self,
        http_client: &C,
        authorized: &AuthorizedRequest,
        event: NotificationEvent,
    ) -> Result<(), Error> {
        let endpoint = self
            .offer
            .issuer_metadata()
            .notification_endpoint()
            .ok_or(Error::UnsupportedFeature("notification endpoint"))?
            .url()
            .clone();

        let body = NotificationRequest::from(event);
        let response = self
            .send_authorized_json(http_client, authorized, &endpoint, &body)
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        match http::error_response::<CredentialErrorCode>(&response) {
            Some(error) => {
                warn!(code = %error.error, "issuer rejected the notification");
                Err(Error::CredentialEndpoint(Box::new(error)))
            }
            None => Err(http::unexpected_status(&response).into()),
        }
    }

    /// Scope and `authorization_details` content for the offered credentials, honoring
    /// the configured preference.
    fn authorization_request_content(&self) -> (Vec<Scope>, Vec<AuthorizationDetail>) {
        let mut scopes = vec![];
        let mut details = vec![];
        for offered in self.offer.credentials() {
            match (&offered.access, self.config.authorize_preference) {
                (OfferedCredentialAccess::ByScope(scope), AuthorizePreference::FavorScopes) => {
                    scopes.push(scope.clone())
                }
                _ => details.push(AuthorizationDetail::new(offered.configuration_id.clone())),
            }
        }
        (scopes, details)
    }

    async fn push_authorization_request<C: HttpClient>(
        &self,
        http_client: &C,
        par_endpoint: &Url,
        parameters: &AuthorizationRequestParameters<'_>,
    ) -> Result<PushedAuthorizationResponse, Error> {
        let client_headers = self
            .config
            .client
            .headers(self.offer.authorization_metadata().issuer(), None)?;

        let response = dpop::send_with_nonce_retry(
            http_client,
            self.dpop.as_ref(),
            Method::POST,
            par_endpoint,
            None,
            |proof| {
                let mut headers = client_headers.clone();
                if let Some(proof) = proof {
                    headers.push(dpop_header(proof)?);
                }
                http::form_post_request(par_endpoint, parameters, headers)
            },
        )
        .await?;

        if response.status().is_success() {
            Ok(http::decode_json(response.body())?)
        } else {
            Err(token_endpoint_error(&response))
        }
    }

    async fn send_token_request<C: HttpClient>(
        &self,
        http_client: &C,
        request: &TokenRequest,
    ) -> Result<TokenResponse, Error> {
        let authorization_metadata = self.offer.authorization_metadata();
        let token_endpoint = authorization_metadata.token_endpoint().url().clone();
        let client_headers = self
            .config
            .client
            .headers(authorization_metadata.issuer(), None)?;

        let response = dpop::send_with_nonce_retry(
            http_client,
            self.dpop.as_ref(),
            Method::POST,
            &token_endpoint,
            None,
            |proof| {
                let mut headers = client_headers.clone();
                if let Some(proof) = proof {
                    headers.push(dpop_header(proof)?);
                }
                http::form_post_request(&token_endpoint, request, headers)
            },
        )
        .await?;

        if !response.status().is_success() {
            return Err(token_endpoint_error(&response));
        }

        let token_response: TokenResponse = http::decode_json(response.body())?;
        if token_response.token_type == TokenType::DPoP && self.dpop.is_none() {
            return Err(Error::Validation {
                context: "token response",
                reason: "server granted a DPoP-bound token but no DPoP signer is configured"
                    .to_string(),
            });
        }
        Ok(token_response)
    }

    /// POST a JSON body to an issuer endpoint with the authorization header matching the
    /// granted token type, and a DPoP proof when the token is DPoP-bound.
    async fn send_authorized_json<C: HttpClient, B: serde::Serialize>(
        &self,
        http_client: &C,
        authorized: &AuthorizedRequest,
        endpoint: &Url,
        body: &B,
    ) -> Result<HttpResponse, Error> {
        let engine = match authorized.token_type() {
            TokenType::DPoP => self.dpop.as_ref(),
            TokenType::Bearer => None,
        };
        let authorization_header = authorized.authorization_header()?;

        dpop::send_with_nonce_retry(
            http_client,
            engine,
            Method::POST,
            endpoint,
            Some(authorized.access_token()),
            |proof| {
                let mut headers = vec![authorization_header.clone()];
                if let Some(proof) = proof {
                    headers.push(dpop_header(proof)?);
                }
                http::json_post_request(endpoint, body, headers)
            },
        )
        .await
    }

    fn negotiate_response_encryption(
        &self,
        provider: Option<&dyn ResponseEncryptionProvider>,
    ) -> Result<Option<ResponseEncryption>, Error> {
        let metadata = self.offer.issuer_metadata().credential_response_encryption();
        match (metadata, provider) {
            (Some(metadata), Some(provider)) => {
                let encryption = provider.generate(metadata)?;
                encryption.check_against(metadata)?;
                Ok(Some(encryption))
            }
            (Some(metadata), None) if metadata.encryption_required() => Err(Error::Validation {
                context: "credential_response_encryption",
                reason: "required by the issuer but no encryption provider was supplied"
                    .to_string(),
            }),
            (None, Some(_)) => {
                debug!("issuer does not support credential response encryption, sending plain");
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("credential_issuer", self.offer.credential_issuer())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn dpop_header(proof: &Dpop) -> Result<(HeaderName, HeaderValue), Error> {
    Ok((HeaderName::from_static("dpop"), proof.header_value()?))
}

fn token_endpoint_error(response: &HttpResponse) -> Error {
    match http::error_response::<TokenErrorCode>(response) {
        Some(error) => Error::TokenEndpoint(Box::new(error)),
        None => http::unexpected_status(response).into(),
    }
}

fn deferred_failure(error: CredentialErrorResponse) -> DeferredOutcome {
    match error.error.error {
        CredentialErrorCode::IssuancePending => DeferredOutcome::IssuancePending {
            interval: error.interval,
        },
        _ => DeferredOutcome::Failed { error: error.error },
    }
}

fn interpret_credential_response(
    authorized: AuthorizedRequest,
    response: HttpResponse,
    encryption: Option<&ResponseEncryption>,
) -> Result<(AuthorizedRequest, SubmissionOutcome), Error> {
    if response.status().is_success() {
        let decrypted;
        let body: &[u8] = match encryption {
            Some(encryption)
                if http::content_type_has_essence(response.headers(), http::MIME_TYPE_JWT) =>
            {
                let compact = std::str::from_utf8(response.body()).map_err(|e| {
                    Error::Validation {
                        context: "credential response",
                        reason: format!("JWE body is not valid UTF-8: {e}"),
                    }
                })?;
                decrypted = encryption.decrypter.decrypt(compact)?;
                &decrypted
            }
            Some(_) => {
                warn!("encryption was requested but the issuer answered in the clear");
                response.body()
            }
            None => response.body(),
        };

        let parsed: CredentialResponse = http::decode_json(body)?;
        let authorized =
            authorized.apply_c_nonce(parsed.c_nonce.clone(), parsed.c_nonce_expires_in)?;

        if let Some(transaction_id) = parsed.transaction_id {
            return Ok((authorized, SubmissionOutcome::Deferred { transaction_id }));
        }

        let credentials = parsed.issued_credentials();
        if credentials.is_empty() {
            return Err(Error::Validation {
                context: "credential response",
                reason: "neither credentials nor a transaction_id present".to_string(),
            });
        }
        return Ok((
            authorized,
            SubmissionOutcome::Success {
                credentials,
                notification_id: parsed.notification_id,
            },
        ));
    }

    let Ok(error) = serde_json::from_slice::<CredentialErrorResponse>(response.body()) else {
        return Err(http::unexpected_status(&response).into());
    };

    match error.error.error {
        CredentialErrorCode::InvalidProof => match error.c_nonce {
            Some(nonce) => {
                let c_nonce = CNonce::new(nonce, error.c_nonce_expires_in)?;
                let authorized = authorized.with_c_nonce(c_nonce.clone());
                Ok((
                    authorized,
                    SubmissionOutcome::InvalidProof {
                        c_nonce,
                        description: error.error.error_description,
                    },
                ))
            }
            // Without a fresh nonce there is nothing to re-sign over.
            None => Ok((authorized, SubmissionOutcome::Failed { error: error.error })),
        },
        _ => {
            let authorized =
                authorized.apply_c_nonce(error.c_nonce.clone(), error.c_nonce_expires_in)?;
            Ok((authorized, SubmissionOutcome::Failed { error: error.error }))
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use base64::prelude::*;
    use oauth2::http::{header::CONTENT_TYPE, Response};
    use oauth2::{AuthorizationCode, ClientId};
    use serde_json::json;
    use sha2::{Digest, Sha256};

    use crate::client_auth::ClientAttestationProvider;
    use crate::error::{CryptoError, TransportError};
    use crate::http::HttpRequest;
    use crate::jose::{self, test::StaticSigner};
    use crate::metadata::{MetadataTrust, MetadataTrustPolicy, SignedJwtVerifier};
    use crate::types::{CredentialConfigurationId, CredentialIssuerId};

    use super::*;

    #[derive(Clone)]
    struct Recorded {
        method: String,
        url: Url,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    impl Recorded {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(header, _)| header.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        }

        fn form_pairs(&self) -> Vec<(String, String)> {
            url::form_urlencoded::parse(&self.body)
                .into_owned()
                .collect()
        }

        fn form_value(&self, name: &str) -> Option<String> {
            self.form_pairs()
                .into_iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value)
        }

        fn json(&self) -> Value {
            serde_json::from_slice(&self.body).expect("request body should be JSON")
        }
    }

    struct MockTransport {
        handler: Box<dyn Fn(&Recorded) -> HttpResponse + Send + Sync>,
        log: Mutex<Vec<Recorded>>,
    }

    impl MockTransport {
        fn new(handler: impl Fn(&Recorded) -> HttpResponse + Send + Sync + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                log: Mutex::new(vec![]),
            }
        }

        fn requests(&self) -> Vec<Recorded> {
            self.log.lock().unwrap().clone()
        }

        fn requests_to(&self, path: &str) -> Vec<Recorded> {
            self.requests()
                .into_iter()
                .filter(|recorded| recorded.url.path() == path)
                .collect()
        }
    }

    impl HttpClient for MockTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let (parts, body) = request.into_parts();
            let recorded = Recorded {
                method: parts.method.to_string(),
                url: parts.uri.to_string().parse().expect("request URI is a URL"),
                headers: parts
                    .headers
                    .iter()
                    .map(|(name, value)| {
                        (
                            name.as_str().to_string(),
                            value.to_str().unwrap_or_default().to_string(),
                        )
                    })
                    .collect(),
                body,
            };
            self.log.lock().unwrap().push(recorded.clone());
            Ok((self.handler)(&recorded))
        }
    }

    fn json_response(status: u16, body: Value) -> HttpResponse {
        json_response_with_headers(status, body, &[])
    }

    fn json_response_with_headers(
        status: u16,
        body: Value,
        headers: &[(&str, &str)],
    ) -> HttpResponse {
        let mut builder = Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(serde_json::to_vec(&body).unwrap()).unwrap()
    }

    fn issuer_metadata_json() -> Value {
        json!({
            "credential_issuer": "https://issuer.example",
            "authorization_servers": ["https://auth.issuer.example"],
            "credential_endpoint": "https://issuer.example/credential",
            "nonce_endpoint": "https://issuer.example/nonce",
            "deferred_credential_endpoint": "https://issuer.example/deferred",
            "notification_endpoint": "https://issuer.example/notification",
            "credential_configurations_supported": {
                "eu.europa.ec.eudi.pid_mso_mdoc": {
                    "format": "mso_mdoc",
                    "doctype": "eu.europa.ec.eudi.pid.1",
                    "scope": "eu.europa.ec.eudi.pid.1",
                    "proof_types_supported": {
                        "jwt": { "proof_signing_alg_values_supported": ["ES256"] }
                    }
                }
            }
        })
    }

    fn as_metadata_json() -> Value {
        json!({
            "issuer": "https://auth.issuer.example",
            "authorization_endpoint": "https://auth.issuer.example/authorize",
            "token_endpoint": "https://auth.issuer.example/token",
            "pushed_authorization_request_endpoint": "https://auth.issuer.example/par",
            "response_types_supported": ["code"],
            "code_challenge_methods_supported": ["S256"],
            "dpop_signing_alg_values_supported": ["ES256"],
            "token_endpoint_auth_methods_supported": ["none", "attest_jwt_client_auth"]
        })
    }

    fn discovery(recorded: &Recorded) -> Option<HttpResponse> {
        match recorded.url.as_str() {
            "https://issuer.example/.well-known/openid-credential-issuer" => {
                Some(json_response(200, issuer_metadata_json()))
            }
            "https://auth.issuer.example/.well-known/openid-configuration" => {
                Some(json_response(200, as_metadata_json()))
            }
            _ => None,
        }
    }

    const OFFER_PRE_AUTHORIZED: &str = r#"{
        "credential_issuer": "https://issuer.example",
        "credential_configuration_ids": ["eu.europa.ec.eudi.pid_mso_mdoc"],
        "grants": {
            "urn:ietf:params:oauth:grant-type:pre-authorized_code": {
                "pre-authorized_code": "PRE-123",
                "tx_code": { "input_mode": "numeric", "length": 4 }
            }
        }
    }"#;

    const OFFER_AUTHORIZATION_CODE: &str = r#"{
        "credential_issuer": "https://issuer.example",
        "credential_configuration_ids": ["eu.europa.ec.eudi.pid_mso_mdoc"],
        "grants": {
            "authorization_code": { "issuer_state": "issuer-state-7" }
        }
    }"#;

    fn jwt_claims(jwt: &str) -> serde_json::Map<String, Value> {
        let (_, claims) = jose::decode_unverified(jwt).unwrap();
        claims
    }

    fn config() -> Config {
        Config::new(
            ClientAuth::Public {
                client_id: ClientId::new("wallet-dev".to_string()),
            },
            RedirectUrl::new("https://wallet.example/cb".to_string()).unwrap(),
        )
    }

    fn pid_payload() -> IssuanceRequestPayload {
        IssuanceRequestPayload::ConfigurationBased {
            credential_configuration_id: CredentialConfigurationId::new(
                "eu.europa.ec.eudi.pid_mso_mdoc".to_string(),
            ),
            claim_set: None,
        }
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert!(config.use_par());
        assert_eq!(config.authorize_preference(), AuthorizePreference::FavorScopes);
        assert!(matches!(
            config.issuer_metadata_policy(),
            IssuerMetadataPolicy::IgnoreSigned
        ));
    }

    // Pre-authorized code with a transaction code.
    #[tokio::test]
    async fn pre_authorized_code_flow_with_tx_code() {
        let transport = MockTransport::new(|recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({
                        "access_token": "AT-1",
                        "token_type": "Bearer",
                        "c_nonce": "CN1",
                        "c_nonce_expires_in": 30
                    }),
                ),
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();

        let token_requests = transport.requests_to("/token");
        assert_eq!(token_requests.len(), 1);
        assert_eq!(token_requests[0].method, "POST");
        let pairs = token_requests[0].form_pairs();
        for expected in [
            ("grant_type", "urn:ietf:params:oauth:grant-type:pre-authorized_code"),
            ("pre-authorized_code", "PRE-123"),
            ("tx_code", "1234"),
            ("client_id", "wallet-dev"),
        ] {
            assert!(
                pairs.contains(&(expected.0.to_string(), expected.1.to_string())),
                "token request is missing {expected:?}: {pairs:?}"
            );
        }

        assert_eq!(authorized.access_token().secret(), "AT-1");
        assert_eq!(authorized.c_nonce().unwrap().nonce(), "CN1");
        assert_matches!(authorized, AuthorizedRequest::ProofRequired { .. });
    }

    #[tokio::test]
    async fn missing_tx_code_fails_before_any_token_request() {
        let transport = MockTransport::new(|recorded| {
            discovery(recorded)
                .unwrap_or_else(|| panic!("unexpected request to {}", recorded.url.path()))
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        let error = client
            .authorize_with_pre_authorized_code(&transport, None)
            .await
            .unwrap_err();
        assert_matches!(error, Error::Validation { context: "tx_code", .. });
        assert!(transport.requests_to("/token").is_empty());
    }

    // PAR with DPoP nonce recovery.
    #[tokio::test]
    async fn par_retries_once_with_the_served_dpop_nonce() {
        let par_calls = Mutex::new(0u32);
        let transport = MockTransport::new(move |recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/par" => {
                    let mut calls = par_calls.lock().unwrap();
                    *calls += 1;
                    if *calls == 1 {
                        json_response_with_headers(
                            401,
                            json!({"error": "use_dpop_nonce"}),
                            &[("DPoP-Nonce", "N1")],
                        )
                    } else {
                        json_response(
                            201,
                            json!({
                                "request_uri": "urn:ietf:params:oauth:request_uri:abc",
                                "expires_in": 60
                            }),
                        )
                    }
                }
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_AUTHORIZATION_CODE.to_string()),
            config().set_dpop_signer(Some(Arc::new(StaticSigner::es256()))),
        )
        .await
        .unwrap();

        let prepared = client
            .prepare_authorization_request(&transport, None)
            .await
            .unwrap();

        let par_requests = transport.requests_to("/par");
        assert_eq!(par_requests.len(), 2);

        let first_proof = jwt_claims(par_requests[0].header("dpop").unwrap());
        assert!(first_proof.get("nonce").is_none());
        let second_proof = jwt_claims(par_requests[1].header("dpop").unwrap());
        assert_eq!(second_proof["nonce"], "N1");
        assert_eq!(second_proof["htu"], "https://auth.issuer.example/par");

        // The pushed form carries the full authorization request.
        assert_eq!(
            par_requests[1].form_value("issuer_state").as_deref(),
            Some("issuer-state-7")
        );
        assert_eq!(
            par_requests[1].form_value("code_challenge_method").as_deref(),
            Some("S256")
        );

        let query: Vec<(String, String)> = prepared
            .authorization_url()
            .query_pairs()
            .into_owned()
            .collect();
        assert!(query.contains(&(
            "request_uri".to_string(),
            "urn:ietf:params:oauth:request_uri:abc".to_string()
        )));
        assert!(query.contains(&("client_id".to_string(), "wallet-dev".to_string())));
        assert!(query
            .iter()
            .any(|(name, value)| name == "state" && value == prepared.state().secret()));
    }

    // PKCE invariant: the verifier redeemed at the token endpoint hashes to the
    // challenge sent in the authorization request.
    #[tokio::test]
    async fn authorization_code_flow_uses_pkce_end_to_end() {
        let transport = MockTransport::new(|recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({
                        "access_token": "AT-2",
                        "token_type": "Bearer",
                        "c_nonce": "CN1"
                    }),
                ),
                "/credential" => json_response(
                    200,
                    json!({
                        "credentials": [{ "credential": "eyJtZG9jIn0" }],
                        "notification_id": "nid-1"
                    }),
                ),
                "/notification" => json_response(204, json!(null)),
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_AUTHORIZATION_CODE.to_string()),
            config().set_use_par(false),
        )
        .await
        .unwrap();

        let prepared = client
            .prepare_authorization_request(&transport, None)
            .await
            .unwrap();
        assert!(prepared.request_uri().is_none());

        let query: Vec<(String, String)> = prepared
            .authorization_url()
            .query_pairs()
            .into_owned()
            .collect();
        let challenge = query
            .iter()
            .find(|(name, _)| name == "code_challenge")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert!(query.contains(&("issuer_state".to_string(), "issuer-state-7".to_string())));
        assert!(query.contains(&("scope".to_string(), "eu.europa.ec.eudi.pid.1".to_string())));

        let state = prepared.state().clone();
        let bound = prepared
            .bind_code(AuthorizationCode::new("CODE-9".to_string()), &state)
            .unwrap();
        let authorized = client
            .exchange_authorization_code(&transport, bound)
            .await
            .unwrap();

        let token_request = &transport.requests_to("/token")[0];
        assert_eq!(token_request.form_value("code").as_deref(), Some("CODE-9"));
        assert_eq!(
            token_request.form_value("redirect_uri").as_deref(),
            Some("https://wallet.example/cb")
        );
        let verifier = token_request.form_value("code_verifier").unwrap();
        assert_eq!(
            BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
            challenge
        );

        // Proof JWT binds the c_nonce from the token response.
        let signer = StaticSigner::es256();
        let (authorized, outcome) = client
            .request_credential(&transport, authorized, &pid_payload(), &[&signer], None)
            .await
            .unwrap();

        let credential_request = &transport.requests_to("/credential")[0];
        let body = credential_request.json();
        assert_eq!(
            body["credential_configuration_id"],
            "eu.europa.ec.eudi.pid_mso_mdoc"
        );
        assert_eq!(body["proof"]["proof_type"], "jwt");
        let proof = jwt_claims(body["proof"]["jwt"].as_str().unwrap());
        assert_eq!(proof["nonce"], "CN1");
        assert_eq!(proof["aud"], "https://issuer.example");
        assert_eq!(proof["iss"], "wallet-dev");
        assert_eq!(
            credential_request.header("authorization"),
            Some("Bearer AT-2")
        );

        let notification_id = assert_matches!(
            outcome,
            SubmissionOutcome::Success { credentials, notification_id } => {
                assert_eq!(credentials.len(), 1);
                notification_id.unwrap()
            }
        );

        client
            .notify(
                &transport,
                &authorized,
                NotificationEvent::CredentialAccepted { notification_id },
            )
            .await
            .unwrap();
        let notification = &transport.requests_to("/notification")[0];
        assert_eq!(
            notification.json(),
            json!({ "notification_id": "nid-1", "event": "credential_accepted" })
        );
    }

    // Any DPoP-Nonce seen on a response is bound into the next proof, and the
    // access-token hash accompanies authorized requests.
    #[tokio::test]
    async fn dpop_nonce_from_token_response_flows_into_credential_request() {
        let transport = MockTransport::new(|recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response_with_headers(
                    200,
                    json!({
                        "access_token": "AT-3",
                        "token_type": "DPoP",
                        "c_nonce": "CN1"
                    }),
                    &[("DPoP-Nonce", "N2")],
                ),
                "/credential" => json_response(
                    200,
                    json!({ "credentials": [{ "credential": "eyJtZG9jIn0" }] }),
                ),
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config().set_dpop_signer(Some(Arc::new(StaticSigner::es256()))),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();

        let signer = StaticSigner::es256();
        let (_, outcome) = client
            .request_credential(&transport, authorized, &pid_payload(), &[&signer], None)
            .await
            .unwrap();
        assert_matches!(outcome, SubmissionOutcome::Success { .. });

        let credential_request = &transport.requests_to("/credential")[0];
        assert_eq!(
            credential_request.header("authorization"),
            Some("DPoP AT-3")
        );
        let proof = jwt_claims(credential_request.header("dpop").unwrap());
        assert_eq!(proof["nonce"], "N2");
        assert_eq!(proof["htu"], "https://issuer.example/credential");
        assert_eq!(
            proof["ath"],
            BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(b"AT-3"))
        );
    }

    // invalid_proof surfaces the fresh c_nonce and the next proof uses it.
    #[tokio::test]
    async fn invalid_proof_hands_back_a_fresh_nonce() {
        let credential_calls = Mutex::new(0u32);
        let transport = MockTransport::new(move |recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({ "access_token": "AT-4", "token_type": "Bearer", "c_nonce": "CN1" }),
                ),
                "/credential" => {
                    let mut calls = credential_calls.lock().unwrap();
                    *calls += 1;
                    if *calls == 1 {
                        json_response(
                            400,
                            json!({
                                "error": "invalid_proof",
                                "error_description": "proof must be bound to the issuer nonce",
                                "c_nonce": "CN2",
                                "c_nonce_expires_in": 5
                            }),
                        )
                    } else {
                        json_response(
                            200,
                            json!({ "credentials": [{ "credential": "eyJtZG9jIn0" }] }),
                        )
                    }
                }
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();

        let signer = StaticSigner::es256();
        let (authorized, outcome) = client
            .request_credential(&transport, authorized, &pid_payload(), &[&signer], None)
            .await
            .unwrap();

        assert_matches!(
            &outcome,
            SubmissionOutcome::InvalidProof { c_nonce, .. } if c_nonce.nonce() == "CN2"
        );
        assert_eq!(authorized.c_nonce().unwrap().nonce(), "CN2");

        // Re-signing with the returned state binds the fresh nonce.
        let (_, outcome) = client
            .request_credential(&transport, authorized, &pid_payload(), &[&signer], None)
            .await
            .unwrap();
        assert_matches!(outcome, SubmissionOutcome::Success { .. });

        let second = &transport.requests_to("/credential")[1];
        let proof = jwt_claims(second.json()["proof"]["jwt"].as_str().unwrap());
        assert_eq!(proof["nonce"], "CN2");
    }

    // Deferred issuance, polled until issued.
    #[tokio::test]
    async fn deferred_issuance_polls_until_issued() {
        let deferred_calls = Mutex::new(0u32);
        let transport = MockTransport::new(move |recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({ "access_token": "AT-5", "token_type": "Bearer", "c_nonce": "CN1" }),
                ),
                "/credential" => json_response(200, json!({ "transaction_id": "tx-7" })),
                "/deferred" => {
                    let mut calls = deferred_calls.lock().unwrap();
                    *calls += 1;
                    if *calls == 1 {
                        json_response(202, json!({ "error": "issuance_pending", "interval": 5 }))
                    } else {
                        json_response(
                            200,
                            json!({ "credentials": [{ "credential": "eyJtZG9jIn0" }] }),
                        )
                    }
                }
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();

        let signer = StaticSigner::es256();
        let (authorized, outcome) = client
            .request_credential(&transport, authorized, &pid_payload(), &[&signer], None)
            .await
            .unwrap();
        let transaction_id = assert_matches!(
            outcome,
            SubmissionOutcome::Deferred { transaction_id } => transaction_id
        );
        assert_eq!(transaction_id, TransactionId::new("tx-7".to_string()));

        let (authorized, outcome) = client
            .query_deferred(&transport, authorized, &transaction_id)
            .await
            .unwrap();
        assert_matches!(
            outcome,
            DeferredOutcome::IssuancePending { interval: Some(5) }
        );

        let (_, outcome) = client
            .query_deferred(&transport, authorized, &transaction_id)
            .await
            .unwrap();
        assert_matches!(
            outcome,
            DeferredOutcome::Issued { credentials, .. } if credentials.len() == 1
        );

        let polls = transport.requests_to("/deferred");
        assert_eq!(polls.len(), 2);
        assert_eq!(polls[0].json(), json!({ "transaction_id": "tx-7" }));
        assert_eq!(polls[1].json(), json!({ "transaction_id": "tx-7" }));
    }

    // Signed metadata whose iss does not match the issuer is rejected before any
    // further network traffic.
    #[tokio::test]
    async fn mismatched_signed_metadata_stops_resolution() {
        struct AcceptAll;
        impl SignedJwtVerifier for AcceptAll {
            fn verify(&self, _jws: &str, _trust: &MetadataTrust) -> Result<(), CryptoError> {
                Ok(())
            }
        }

        fn fake_jwt(claims: Value) -> String {
            let header = BASE64_URL_SAFE_NO_PAD.encode(
                serde_json::to_vec(&json!({ "alg": "ES256", "typ": "JWT" })).unwrap(),
            );
            let claims = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
            let signature = BASE64_URL_SAFE_NO_PAD.encode(b"sig");
            format!("{header}.{claims}.{signature}")
        }

        let transport = MockTransport::new(move |recorded| {
            match recorded.url.as_str() {
                "https://issuer.example/.well-known/openid-credential-issuer" => {
                    let mut metadata = issuer_metadata_json();
                    metadata["signed_metadata"] = Value::String(fake_jwt(json!({
                        "iss": "https://evil.example",
                        "sub": "https://issuer.example",
                        "iat": 1735689600
                    })));
                    json_response(200, metadata)
                }
                other => panic!("unexpected request to {other}"),
            }
        });

        let policy = IssuerMetadataPolicy::RequireSigned(MetadataTrustPolicy {
            trust: MetadataTrust::Keys(vec![]),
            verifier: Arc::new(AcceptAll),
        });

        let error = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config().set_issuer_metadata_policy(policy),
        )
        .await
        .unwrap_err();

        assert_matches!(error, Error::MetadataInvalid { reason } if reason.contains("iss"));
        assert_eq!(transport.requests().len(), 1);
    }

    // Attestation-based client authentication at the token endpoint.
    #[tokio::test]
    async fn attested_client_authenticates_with_both_headers() {
        struct FixedAttestation;
        impl ClientAttestationProvider for FixedAttestation {
            fn client_attestation(&self) -> Result<String, CryptoError> {
                Ok("header.wallet-attestation.signature".to_string())
            }
        }

        let transport = MockTransport::new(|recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({ "access_token": "AT-6", "token_type": "Bearer" }),
                ),
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            Config::new(
                ClientAuth::Attested {
                    client_id: ClientId::new("wallet-dev".to_string()),
                    attestation_provider: Arc::new(FixedAttestation),
                    pop_signer: Arc::new(StaticSigner::es256()),
                },
                RedirectUrl::new("https://wallet.example/cb".to_string()).unwrap(),
            ),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();
        assert_matches!(authorized, AuthorizedRequest::NoProofRequired { .. });

        let token_request = &transport.requests_to("/token")[0];
        assert_eq!(
            token_request.header("oauth-client-attestation"),
            Some("header.wallet-attestation.signature")
        );
        let pop = jwt_claims(token_request.header("oauth-client-attestation-pop").unwrap());
        assert_eq!(pop["iss"], "wallet-dev");
        assert_eq!(pop["aud"], "https://auth.issuer.example");
        assert!(token_request.form_value("client_secret").is_none());
    }

    #[tokio::test]
    async fn authorization_server_discovery_falls_back_to_oauth_metadata() {
        let transport = MockTransport::new(|recorded| match recorded.url.as_str() {
            "https://issuer.example/.well-known/openid-credential-issuer" => {
                json_response(200, issuer_metadata_json())
            }
            "https://auth.issuer.example/.well-known/openid-configuration" => {
                json_response(404, json!({ "error": "not found" }))
            }
            "https://auth.issuer.example/.well-known/oauth-authorization-server" => {
                json_response(200, as_metadata_json())
            }
            other => panic!("unexpected request to {other}"),
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        assert_eq!(
            client.offer().authorization_metadata().issuer().as_str(),
            "https://auth.issuer.example"
        );
    }

    #[tokio::test]
    async fn unknown_offered_configuration_is_rejected() {
        let transport = MockTransport::new(|recorded| {
            discovery(recorded)
                .unwrap_or_else(|| panic!("unexpected request to {}", recorded.url.path()))
        });

        let offer = r#"{
            "credential_issuer": "https://issuer.example",
            "credential_configuration_ids": ["not-a-known-configuration"]
        }"#;

        let error = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(offer.to_string()),
            config(),
        )
        .await
        .unwrap_err();

        assert_matches!(
            error,
            Error::OfferInvalid { reason } if reason.contains("not-a-known-configuration")
        );
    }

    #[tokio::test]
    async fn nonce_endpoint_populates_the_proof_required_state() {
        let transport = MockTransport::new(|recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({ "access_token": "AT-7", "token_type": "Bearer" }),
                ),
                "/nonce" => {
                    json_response(200, json!({ "c_nonce": "FRESH", "c_nonce_expires_in": 120 }))
                }
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();
        assert_matches!(authorized, AuthorizedRequest::NoProofRequired { .. });

        let authorized = client
            .refresh_proof_nonce(&transport, authorized)
            .await
            .unwrap();
        assert_eq!(authorized.c_nonce().unwrap().nonce(), "FRESH");
    }

    #[tokio::test]
    async fn identifier_based_requests_are_declared_unsupported() {
        let transport = MockTransport::new(|recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({ "access_token": "AT-8", "token_type": "Bearer" }),
                ),
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();

        let payload = IssuanceRequestPayload::IdentifierBased {
            credential_configuration_id: CredentialConfigurationId::new(
                "eu.europa.ec.eudi.pid_mso_mdoc".to_string(),
            ),
            credential_identifier: "pid-1".to_string(),
        };
        let error = client
            .request_credential(&transport, authorized, &payload, &[], None)
            .await
            .unwrap_err();
        assert_matches!(error, Error::UnsupportedFeature(_));
    }

    #[tokio::test]
    async fn several_proof_signers_emit_the_batch_proofs_member() {
        let transport = MockTransport::new(|recorded| {
            if let Some(response) = discovery(recorded) {
                return response;
            }
            match recorded.url.path() {
                "/token" => json_response(
                    200,
                    json!({ "access_token": "AT-9", "token_type": "Bearer", "c_nonce": "CN1" }),
                ),
                "/credential" => json_response(
                    200,
                    json!({
                        "credentials": [
                            { "credential": "eyJtZG9jIn0" },
                            { "credential": "eyJtZG9jMiJ9" }
                        ]
                    }),
                ),
                path => panic!("unexpected request to {path}"),
            }
        });

        let client = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(OFFER_PRE_AUTHORIZED.to_string()),
            config(),
        )
        .await
        .unwrap();

        let authorized = client
            .authorize_with_pre_authorized_code(&transport, Some(TxCode::new("1234".to_string())))
            .await
            .unwrap();

        let first = StaticSigner::es256();
        let second = StaticSigner::es256();
        let (_, outcome) = client
            .request_credential(
                &transport,
                authorized,
                &pid_payload(),
                &[&first, &second],
                None,
            )
            .await
            .unwrap();
        assert_matches!(
            outcome,
            SubmissionOutcome::Success { credentials, .. } if credentials.len() == 2
        );

        let body = transport.requests_to("/credential")[0].json();
        assert!(body.get("proof").is_none());
        let jwts = body["proofs"]["jwt"].as_array().unwrap();
        assert_eq!(jwts.len(), 2);
        for jwt in jwts {
            assert_eq!(jwt_claims(jwt.as_str().unwrap())["nonce"], "CN1");
        }
    }

    #[tokio::test]
    async fn offer_issuer_id_must_be_valid() {
        let transport = MockTransport::new(|_| panic!("no request expected"));

        let offer = r#"{
            "credential_issuer": "http://issuer.example",
            "credential_configuration_ids": ["pid"]
        }"#;

        let error = Client::resolve_offer(
            &transport,
            CredentialOfferRequest::Value(offer.to_string()),
            config(),
        )
        .await
        .unwrap_err();
        assert_matches!(error, Error::OfferInvalid { .. });
        assert!(transport.requests().is_empty());

        let _ = CredentialIssuerId::new("https://issuer.example".to_string()).unwrap();
    }
}
