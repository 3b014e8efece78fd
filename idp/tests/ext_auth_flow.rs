//! External authentication through insurance apps.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use erezept_idp::error::IdpError;
use erezept_idp::exchange::accept_any_id_token;
use erezept_idp::ext_auth::ExtAuthEngine;
use erezept_idp::lifecycle::TokenLifecycle;
use erezept_idp::mocks::MockIdp;
use erezept_idp::models::KkAppEntry;
use erezept_idp::providers::{ExtAuthRequestStorage, IdpStorage};
use url::Url;

fn entry(pkv: bool, gid: bool) -> KkAppEntry {
    MockIdp::kk_apps()
        .into_iter()
        .find(|entry| entry.kk_app_pkv == pkv && entry.kk_app_gid == gid)
        .expect("mock directory entry")
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[tokio::test]
async fn test_directory_is_verified_and_decoded() {
    let idp = MockIdp::new();
    let env = idp.environment();

    let directory = ExtAuthEngine::new(&env).load_directory_kk_apps().await.unwrap();

    assert_eq!(directory.kk_app_list, MockIdp::kk_apps());
}

#[tokio::test]
async fn test_fast_track_login_for_private_insurer() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let engine = ExtAuthEngine::new(&env);

    let location = engine.start_ext_auth(&entry(true, false)).await.unwrap();
    assert_eq!(location.host_str(), Some("kk.example.com"));
    assert_eq!(env.ext_auth_requests.pending().await.unwrap(), 1);

    let callback = idp.insurance_app_callback(&location, &env.config.ext_auth_redirect_uri);
    let token = engine
        .ext_auth_verify_and_exchange(&callback, accept_any_id_token)
        .await
        .unwrap();

    assert!(token.is_pkv_fast_track);
    assert!(!token.is_pairing_token);
    assert_eq!(env.ext_auth_requests.pending().await.unwrap(), 0);
    assert_eq!(env.storage.token().await.unwrap(), Some(token));
}

#[tokio::test]
async fn test_statutory_insurer_token_is_not_pkv() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let engine = ExtAuthEngine::new(&env);

    let location = engine.start_ext_auth(&entry(false, false)).await.unwrap();
    let callback = idp.insurance_app_callback(&location, &env.config.ext_auth_redirect_uri);
    let token = engine
        .ext_auth_verify_and_exchange(&callback, accept_any_id_token)
        .await
        .unwrap();

    assert!(!token.is_pkv_fast_track);
}

#[tokio::test]
async fn test_gid_login_is_keyed_by_client_state() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let engine = ExtAuthEngine::new(&env);

    let location = engine.start_ext_auth(&entry(false, true)).await.unwrap();
    assert_eq!(location.host_str(), Some("gid.example.com"));

    let state = query_value(&location, "state").unwrap();
    let pending = env.ext_auth_requests.take(&state).await.unwrap().unwrap();
    assert_eq!(pending.state, state);
    env.ext_auth_requests.insert(state, pending).await.unwrap();

    let callback = idp.insurance_app_callback(&location, &env.config.ext_auth_redirect_uri);
    engine
        .ext_auth_verify_and_exchange(&callback, accept_any_id_token)
        .await
        .unwrap();
    assert_eq!(idp.call_count("ext_auth_verify"), 1);
}

#[tokio::test]
async fn test_unknown_state_is_rejected_without_idp_call() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let callback =
        Url::parse("https://redirect.example.com/extauth?code=kk-code&state=never-started").unwrap();

    let result = ExtAuthEngine::new(&env)
        .ext_auth_verify_and_exchange(&callback, accept_any_id_token)
        .await;

    assert!(matches!(result, Err(IdpError::ExtAuthOriginalRequestMissing)));
    assert_eq!(idp.call_count("ext_auth_verify"), 0);
}

#[tokio::test]
async fn test_callback_is_consumed_once() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let engine = ExtAuthEngine::new(&env);

    let location = engine.start_ext_auth(&entry(false, false)).await.unwrap();
    let callback = idp.insurance_app_callback(&location, &env.config.ext_auth_redirect_uri);
    engine
        .ext_auth_verify_and_exchange(&callback, accept_any_id_token)
        .await
        .unwrap();

    let replay = engine
        .ext_auth_verify_and_exchange(&callback, accept_any_id_token)
        .await;
    assert!(matches!(replay, Err(IdpError::ExtAuthOriginalRequestMissing)));
}

#[tokio::test]
async fn test_missing_callback_parameters() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let engine = ExtAuthEngine::new(&env);

    let without_code = Url::parse("https://redirect.example.com/extauth?state=s").unwrap();
    let result = engine
        .ext_auth_verify_and_exchange(&without_code, accept_any_id_token)
        .await;
    assert!(matches!(result, Err(IdpError::ExtAuthMissingParameter(name)) if name == "code"));

    let without_state = Url::parse("https://redirect.example.com/extauth?code=c").unwrap();
    let result = engine
        .ext_auth_verify_and_exchange(&without_state, accept_any_id_token)
        .await;
    assert!(matches!(result, Err(IdpError::ExtAuthMissingParameter(name)) if name == "state"));
}

#[tokio::test]
async fn test_concurrent_flows_do_not_interfere() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let engine = ExtAuthEngine::new(&env);

    let first = engine.start_ext_auth(&entry(false, false)).await.unwrap();
    let second = engine.start_ext_auth(&entry(true, false)).await.unwrap();
    assert_eq!(env.ext_auth_requests.pending().await.unwrap(), 2);

    let second_callback = idp.insurance_app_callback(&second, &env.config.ext_auth_redirect_uri);
    let token = engine
        .ext_auth_verify_and_exchange(&second_callback, accept_any_id_token)
        .await
        .unwrap();
    assert!(token.is_pkv_fast_track);
    assert_eq!(env.ext_auth_requests.pending().await.unwrap(), 1);

    let first_callback = idp.insurance_app_callback(&first, &env.config.ext_auth_redirect_uri);
    let token = engine
        .ext_auth_verify_and_exchange(&first_callback, accept_any_id_token)
        .await
        .unwrap();
    assert!(!token.is_pkv_fast_track);
}

#[tokio::test]
async fn test_pkv_flag_survives_sso_refresh() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let engine = ExtAuthEngine::new(&env);

    let location = engine.start_ext_auth(&entry(true, false)).await.unwrap();
    let callback = idp.insurance_app_callback(&location, &env.config.ext_auth_redirect_uri);
    let mut token = engine
        .ext_auth_verify_and_exchange(&callback, accept_any_id_token)
        .await
        .unwrap();
    token.expires = Utc::now() - Duration::seconds(1);
    env.storage.set_token(Some(token)).await.unwrap();

    let refreshed = TokenLifecycle::new(&env)
        .auto_refreshed_token()
        .await
        .unwrap()
        .unwrap();

    assert!(refreshed.is_pkv_fast_track);
    assert_eq!(idp.call_count("sso_refresh"), 1);
}
