// Registry HTTP API v2 client scoped to a single repository.
//
// Covers what a push needs: the `/v2/` handshake, blob existence checks,
// monolithic blob uploads (POST then PUT with the digest) and manifest
// uploads. Every call takes the caller's cancellation token.

use crate::cancel::with_cancel;
use crate::config::Config;
use crate::digest::DigestUtils;
use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{PushError, Result};
use crate::registry::auth::{Auth, AuthChallenge};
use crate::registry::endpoint::Endpoint;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// Source of a blob upload body. Called again when the upload has to be
/// resent after a token refresh.
#[async_trait]
pub trait BlobBody: Send + Sync {
    async fn body(&self) -> Result<Body>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AuthState {
    Anonymous,
    Basic,
    Bearer {
        challenge: AuthChallenge,
        token: String,
    },
}

pub struct RegistryClientBuilder {
    endpoint: Endpoint,
    repository: String,
    credentials: Option<(String, String)>,
    skip_tls: bool,
    timeout: Option<std::time::Duration>,
}

impl RegistryClientBuilder {
    pub fn new(endpoint: Endpoint, repository: impl Into<String>) -> Self {
        Self {
            endpoint,
            repository: repository.into(),
            credentials: None,
            skip_tls: false,
            timeout: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<(String, String)>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.skip_tls = config.skip_tls;
        self.timeout = Some(config.request_timeout);
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let mut builder = Client::builder();
        if self.skip_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            PushError::Configuration(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(RegistryClient {
            auth: Auth::new(client.clone()),
            client,
            endpoint: self.endpoint,
            repository: self.repository,
            credentials: self.credentials,
            state: Arc::new(RwLock::new(AuthState::Anonymous)),
        })
    }
}

pub struct RegistryClient {
    client: Client,
    auth: Auth,
    endpoint: Endpoint,
    repository: String,
    credentials: Option<(String, String)>,
    state: Arc<RwLock<AuthState>>,
}

impl RegistryClient {
    pub fn builder(endpoint: Endpoint, repository: impl Into<String>) -> RegistryClientBuilder {
        RegistryClientBuilder::new(endpoint, repository)
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn scope(&self) -> String {
        format!("repository:{}:pull,push", self.repository)
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    fn current_state(&self) -> AuthState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or(AuthState::Anonymous)
    }

    fn set_state(&self, state: AuthState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }

    /// Ping `/v2/` and establish whatever authentication the registry asks
    /// for. Mutates nothing remotely.
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<()> {
        with_cancel(cancel, self.authenticate_inner()).await
    }

    async fn authenticate_inner(&self) -> Result<()> {
        let url = self.endpoint.url("")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry ping"))?;

        match response.status() {
            status if status.is_success() => {
                tracing::debug!(
                    registry = %self.endpoint.registry,
                    "Registry allows anonymous access"
                );
                self.set_state(AuthState::Anonymous);
                Ok(())
            }
            StatusCode::UNAUTHORIZED => {
                let challenge = challenge_from(&response).ok_or_else(|| {
                    PushError::Authorization(format!(
                        "registry {} requires authentication but sent no usable challenge",
                        self.endpoint.registry
                    ))
                })?;
                self.answer_challenge(challenge).await
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(HttpErrorHandler::handle_registry_error(
                    status,
                    &error_text,
                    "registry ping",
                ))
            }
        }
    }

    async fn answer_challenge(&self, challenge: AuthChallenge) -> Result<()> {
        match challenge {
            AuthChallenge::Basic { .. } => {
                let Some((username, password)) = self.credentials() else {
                    return Err(PushError::Authorization(format!(
                        "registry {} requires credentials",
                        self.endpoint.registry
                    )));
                };
                let url = self.endpoint.url("")?;
                let response = self
                    .client
                    .get(url)
                    .basic_auth(username, Some(password))
                    .send()
                    .await
                    .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "registry login"))?;
                let status = response.status();
                if !status.is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(HttpErrorHandler::handle_auth_error(status, &error_text));
                }
                self.set_state(AuthState::Basic);
                Ok(())
            }
            bearer @ AuthChallenge::Bearer { .. } => {
                let token = self
                    .auth
                    .fetch_token(&bearer, &self.scope(), self.credentials())
                    .await?;
                tracing::debug!(registry = %self.endpoint.registry, "Obtained bearer token");
                self.set_state(AuthState::Bearer {
                    challenge: bearer,
                    token,
                });
                Ok(())
            }
        }
    }

    fn authorize(&self, request: RequestBuilder, state: &AuthState) -> RequestBuilder {
        match state {
            AuthState::Anonymous => request,
            AuthState::Basic => match self.credentials() {
                Some((username, password)) => request.basic_auth(username, Some(password)),
                None => request,
            },
            AuthState::Bearer { token, .. } => request.bearer_auth(token),
        }
    }

    async fn dispatch(
        &self,
        request: RequestBuilder,
        state: &AuthState,
        context: &str,
    ) -> Result<Response> {
        self.authorize(request, state)
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, context))
    }

    /// Fetch a fresh bearer token for `challenge`.
    async fn refresh_token(&self, challenge: AuthChallenge, context: &str) -> Result<()> {
        tracing::warn!(context = %context, "Received 401, refreshing registry token");
        self.answer_challenge(challenge).await
    }

    /// Send a request built by `build`, refreshing a bearer token once if the
    /// registry answers 401.
    async fn send<F>(&self, build: F, context: &str) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let state = self.current_state();
        let response = self.dispatch(build(&self.client), &state, context).await?;
        let Some(challenge) = refresh_challenge(&state, &response) else {
            return Ok(response);
        };

        self.refresh_token(challenge, context).await?;
        let state = self.current_state();
        self.dispatch(build(&self.client), &state, context).await
    }

    /// Whether the registry holds a committed blob with `digest`.
    pub async fn blob_exists(&self, digest: &str, cancel: &CancellationToken) -> Result<bool> {
        with_cancel(cancel, async {
            let url = self
                .endpoint
                .url(&format!("{}/blobs/{}", self.repository, digest))?;
            let response = self
                .send(|c| c.head(url.clone()), "blob existence check")
                .await?;

            match response.status() {
                status if status.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                status => Err(HttpErrorHandler::handle_registry_error(
                    status,
                    "",
                    "blob existence check",
                )),
            }
        })
        .await
    }

    /// Upload a blob of `size` bytes in a single request. The registry only
    /// commits it after verifying `digest`.
    pub async fn upload_blob(
        &self,
        digest: &str,
        size: u64,
        body: &dyn BlobBody,
        cancel: &CancellationToken,
    ) -> Result<()> {
        with_cancel(cancel, async {
            let start_url = self
                .endpoint
                .url(&format!("{}/blobs/uploads/", self.repository))?;
            let response = self
                .send(
                    |c| c.post(start_url.clone()).header(CONTENT_LENGTH, 0),
                    "blob upload session",
                )
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(HttpErrorHandler::handle_upload_error(
                    status,
                    &error_text,
                    "blob upload session",
                ));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    PushError::registry(
                        status.as_u16(),
                        "upload session response carried no Location header",
                    )
                })?;
            let mut upload_url = start_url.join(location)?;
            upload_url.query_pairs_mut().append_pair("digest", digest);

            tracing::debug!(digest = %digest, size, "Uploading blob");

            let put = |body: Body| {
                self.client
                    .put(upload_url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .header(CONTENT_LENGTH, size)
                    .body(body)
            };
            let state = self.current_state();
            let mut response = self
                .dispatch(put(body.body().await?), &state, "blob upload")
                .await?;
            if let Some(challenge) = refresh_challenge(&state, &response) {
                self.refresh_token(challenge, "blob upload").await?;
                let state = self.current_state();
                response = self
                    .dispatch(put(body.body().await?), &state, "blob upload")
                    .await?;
            }

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(HttpErrorHandler::handle_upload_error(
                    status,
                    &error_text,
                    "blob upload",
                ));
            }
            Ok(())
        })
        .await
    }

    /// PUT a manifest under `reference` (tag or digest) and return the digest
    /// the registry stored it as.
    pub async fn put_manifest(
        &self,
        reference: &str,
        media_type: &str,
        manifest: Bytes,
        cancel: &CancellationToken,
    ) -> Result<String> {
        with_cancel(cancel, async {
            let url = self
                .endpoint
                .url(&format!("{}/manifests/{}", self.repository, reference))?;
            let response = self
                .send(
                    |c| {
                        c.put(url.clone())
                            .header(CONTENT_TYPE, media_type)
                            .body(manifest.clone())
                    },
                    "manifest upload",
                )
                .await?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(HttpErrorHandler::handle_registry_error(
                    status,
                    &error_text,
                    "manifest upload",
                ));
            }

            let digest = response
                .headers()
                .get(DOCKER_CONTENT_DIGEST)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .unwrap_or_else(|| DigestUtils::compute_docker_digest(&manifest));
            Ok(digest)
        })
        .await
    }
}

/// The challenge to answer before resending a request the registry refused
/// with 401. Only bearer tokens are refreshed.
fn refresh_challenge(state: &AuthState, response: &Response) -> Option<AuthChallenge> {
    if response.status() != StatusCode::UNAUTHORIZED {
        return None;
    }
    match (state, challenge_from(response)) {
        (_, Some(challenge @ AuthChallenge::Bearer { .. })) => Some(challenge),
        (AuthState::Bearer { challenge, .. }, _) => Some(challenge.clone()),
        _ => None,
    }
}

fn challenge_from(response: &Response) -> Option<AuthChallenge> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(AuthChallenge::parse)
        .max_by_key(|c| matches!(c, AuthChallenge::Bearer { .. }))
}
