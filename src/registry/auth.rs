//! Registry authentication
//!
//! Parses `WWW-Authenticate` challenges and exchanges credentials for bearer
//! tokens following the Docker token authentication flow.

use crate::error::handlers::{HttpErrorHandler, NetworkErrorHandler};
use crate::error::{PushError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Basic {
        realm: Option<String>,
    },
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params_str) = header.split_once(' ').unwrap_or((header, ""));
        let params = parse_params(params_str);

        match scheme.to_ascii_lowercase().as_str() {
            "basic" => Some(AuthChallenge::Basic {
                realm: params.get("realm").cloned(),
            }),
            "bearer" => Some(AuthChallenge::Bearer {
                realm: params.get("realm")?.clone(),
                service: params.get("service").cloned(),
                scope: params.get("scope").cloned(),
            }),
            _ => None,
        }
    }
}

/// Split `key="value",key2="a,b"` respecting quoted commas.
fn parse_params(params_str: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = params_str.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(stripped) = rest.strip_prefix('"') {
            let end = stripped.find('"').unwrap_or(stripped.len());
            let value = &stripped[..end];
            rest = stripped.get(end + 1..).unwrap_or("");
            value
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let value = rest[..end].trim();
            rest = &rest[end..];
            value
        };
        params.insert(key, value.to_string());
        rest = rest.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Auth {
    client: Client,
}

impl Auth {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Exchange credentials (or nothing, for anonymous access) for a bearer
    /// token valid for `scope`.
    pub async fn fetch_token(
        &self,
        challenge: &AuthChallenge,
        scope: &str,
        credentials: Option<(&str, &str)>,
    ) -> Result<String> {
        let AuthChallenge::Bearer { realm, service, .. } = challenge else {
            return Err(PushError::Authorization(
                "token requested for a non-bearer challenge".to_string(),
            ));
        };

        let mut query: Vec<(&str, &str)> = vec![("scope", scope)];
        if let Some(service) = service {
            query.push(("service", service.as_str()));
        }

        tracing::debug!(realm = %realm, scope = %scope, "Requesting registry token");

        let mut request = self.client.get(realm.as_str()).query(&query);
        if let Some((username, password)) = credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "token request"))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(HttpErrorHandler::handle_auth_error(status, &error_text));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            PushError::Authorization(format!("failed to parse token response: {}", e))
        })?;

        token_response
            .token
            .or(token_response.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PushError::Authorization("token response carried no token".to_string()))
    }
}
