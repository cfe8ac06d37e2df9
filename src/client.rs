//! OAuth Client
//!
//! Stateless client for the provider's authorize and token endpoints.

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::core::{HttpMethod, HttpRequest, HttpTransport, ReqwestHttpTransport};
use crate::error::{
    create_error_from_response, AuthorizationError, ConfigurationError, OAuth2Error,
    ProtocolError, ProviderError,
};
use crate::types::{ClientAuthMethod, GrantType, OAuth2Config, TokenGrant, TokenResponse};

/// Provider operations needed by the coordinator and the re-authorization flow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Authorize URL the human opens in a browser.
    fn build_authorization_url(&self, state_nonce: &str) -> Result<String, OAuth2Error>;

    /// Exchange an authorization code for a fresh token grant.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, OAuth2Error>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuth2Error>;
}

/// HTTP implementation of [`OAuthClient`].
pub struct HttpOAuthClient<T: HttpTransport = ReqwestHttpTransport> {
    config: OAuth2Config,
    transport: Arc<T>,
}

impl HttpOAuthClient<ReqwestHttpTransport> {
    /// Create a client over a reqwest transport using the configured timeout.
    pub fn new(config: OAuth2Config) -> Result<Self, OAuth2Error> {
        let transport = ReqwestHttpTransport::with_options(
            config.timeout,
            crate::core::DEFAULT_MAX_RESPONSE_SIZE,
        )?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }
}

impl<T: HttpTransport> HttpOAuthClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(config: OAuth2Config, transport: Arc<T>) -> Self {
        Self { config, transport }
    }

    /// Get the OAuth2 configuration.
    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    fn token_request_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("accept".to_string(), "application/json".to_string());

        let credentials = &self.config.credentials;
        if credentials.auth_method == ClientAuthMethod::ClientSecretBasic {
            if let Some(secret) = &credentials.client_secret {
                let pair = format!("{}:{}", credentials.client_id, secret.expose_secret());
                let encoded = base64::engine::general_purpose::STANDARD.encode(pair);
                headers.insert("authorization".to_string(), format!("Basic {}", encoded));
            }
        }

        headers
    }

    fn token_request_body(&self, grant_type: GrantType, params: &[(&str, &str)]) -> String {
        let mut form = url::form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", grant_type.as_str());
        form.extend_pairs(params.iter().copied());

        let credentials = &self.config.credentials;
        if credentials.auth_method == ClientAuthMethod::ClientSecretPost {
            form.append_pair("client_id", &credentials.client_id);
            if let Some(secret) = &credentials.client_secret {
                form.append_pair("client_secret", secret.expose_secret());
            }
        }

        form.finish()
    }

    async fn request_token(
        &self,
        grant_type: GrantType,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, OAuth2Error> {
        debug!(grant_type = grant_type.as_str(), "requesting token");

        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.config.provider.token_endpoint.clone(),
            headers: self.token_request_headers(),
            body: Some(self.token_request_body(grant_type, params)),
            timeout: Some(self.config.timeout),
        };

        let response = self.transport.send(request).await?;

        if !response.is_success() {
            debug!(status = response.status, "token endpoint returned an error");
            return Err(create_error_from_response(
                response.status,
                &response.headers,
                &response.body,
            ));
        }

        let token_response: TokenResponse = serde_json::from_str(&response.body).map_err(|e| {
            OAuth2Error::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })?;

        TokenGrant::from_response(token_response, Utc::now())
    }
}

#[async_trait]
impl<T: HttpTransport> OAuthClient for HttpOAuthClient<T> {
    fn build_authorization_url(&self, state_nonce: &str) -> Result<String, OAuth2Error> {
        let mut url = Url::parse(&self.config.provider.authorization_endpoint).map_err(|_| {
            OAuth2Error::Configuration(ConfigurationError::InvalidEndpoint {
                url: self.config.provider.authorization_endpoint.clone(),
            })
        })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.credentials.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("state", state_nonce);
            if !self.config.default_scopes.is_empty() {
                query.append_pair("scope", &self.config.default_scopes.join(" "));
            }
        }

        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, OAuth2Error> {
        self.request_token(
            GrantType::AuthorizationCode,
            &[("code", code), ("redirect_uri", redirect_uri)],
        )
        .await
        .map_err(|error| match error {
            OAuth2Error::Provider(ProviderError::InvalidGrant { message }) => {
                OAuth2Error::Authorization(AuthorizationError::ExpiredAuthorizationCode { message })
            }
            other => other,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuth2Error> {
        self.request_token(GrantType::RefreshToken, &[("refresh_token", refresh_token)])
            .await
    }
}
