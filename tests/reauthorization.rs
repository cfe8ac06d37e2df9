//! Human re-authorization against a mock provider.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use brokerage_token_keeper::{
    oauth2_config, CoordinatorConfig, ErrorClass, HttpOAuthClient, InMemoryTokenStore,
    ReauthorizationFlow, RefreshCoordinator, TokenOutcome,
};

const REDIRECT: &str = "https://127.0.0.1:8182/callback";

fn flow(
    server: &MockServer,
    store: Arc<InMemoryTokenStore>,
) -> (
    Arc<HttpOAuthClient>,
    ReauthorizationFlow<HttpOAuthClient, InMemoryTokenStore>,
) {
    let config = oauth2_config()
        .client_id("app-key")
        .client_secret("app-secret")
        .authorization_endpoint(format!("{}/v1/oauth/authorize", server.uri()))
        .token_endpoint(format!("{}/v1/oauth/token", server.uri()))
        .redirect_uri(REDIRECT)
        .add_default_scope("readonly")
        .build()
        .unwrap();
    let client = Arc::new(HttpOAuthClient::new(config).unwrap());
    let flow = ReauthorizationFlow::new(
        client.clone(),
        store,
        REDIRECT,
        &CoordinatorConfig::default(),
    );
    (client, flow)
}

#[tokio::test]
async fn exchange_persists_a_record_the_coordinator_accepts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=C0.abc%40"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "token_type": "Bearer",
            "expires_in": 1800,
            "scope": "readonly"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let (client, flow) = flow(&server, store.clone());

    let (session, authorize_url) = assert_ok!(flow.begin());
    let params: HashMap<_, _> = Url::parse(&authorize_url)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect();
    assert_eq!(params["state"], session.state_nonce);
    assert_eq!(params["response_type"], "code");

    let redirect = format!("{}?code=C0.abc%40&state={}", REDIRECT, session.state_nonce);
    let record = assert_ok!(flow.complete_from_redirect(session, &redirect).await);
    assert_eq!(record.refresh_count, 0);
    assert_eq!(store.write_count(), 1);

    let coordinator = RefreshCoordinator::new(client, store, CoordinatorConfig::default());
    let outcome = assert_ok!(coordinator.obtain_usable_token().await);
    assert!(matches!(outcome, TokenOutcome::Unchanged(_)));
}

#[tokio::test]
async fn provider_rejecting_the_code_is_an_expired_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "authorization code expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let (_, flow) = flow(&server, store.clone());
    let (session, _) = flow.begin().unwrap();
    let redirect = format!("{}?code=late&state={}", REDIRECT, session.state_nonce);

    let err = assert_err!(flow.complete_from_redirect(session, &redirect).await);
    assert_eq!(err.class(), ErrorClass::ExpiredAuthorizationCode);
    assert!(store.current().is_none());
}

#[tokio::test]
async fn expired_session_issues_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (_, flow) = flow(&server, Arc::new(InMemoryTokenStore::new()));
    let (mut session, _) = flow.begin().unwrap();
    session.expires_at = session.created_at - Duration::seconds(1);
    let redirect = format!("{}?code=abc&state={}", REDIRECT, session.state_nonce);

    let err = assert_err!(flow.complete_from_redirect(session, &redirect).await);
    assert_eq!(err.class(), ErrorClass::ExpiredAuthorizationCode);
}
