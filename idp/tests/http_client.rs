//! `HttpIdpClient` against a stub HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use erezept_idp::IdpConfig;
use erezept_idp::crypto::{Jwe, Jwt, base64url_encode};
use erezept_idp::error::{IdpError, NetworkError};
use erezept_idp::providers::{HttpIdpClient, IdpClient};
use reqwest::{Client, redirect};
use serde_json::json;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpIdpClient {
    let config = IdpConfig::new(
        format!("{}/.well-known/openid-configuration", server.uri()),
        "https://redirect.example.com/erezept".to_string(),
    );
    HttpIdpClient::new(&config).unwrap()
}

fn endpoint(server: &MockServer, path: &str) -> Url {
    Url::parse(&format!("{}{path}", server.uri())).unwrap()
}

fn jwe() -> Jwe {
    Jwe::parse("aGVhZGVy.a2V5.aXY.Y2lwaGVy.dGFn").unwrap()
}

fn unsigned_jwt(claims: &serde_json::Value) -> String {
    format!(
        "{}.{}.{}",
        base64url_encode(br#"{"alg":"BP256R1"}"#),
        base64url_encode(claims.to_string().as_bytes()),
        base64url_encode(b"signature"),
    )
}

fn jwk(kid: &str) -> serde_json::Value {
    json!({
        "kty": "EC",
        "crv": "BP-256",
        "x": base64url_encode(&[1; 32]),
        "y": base64url_encode(&[2; 32]),
        "kid": kid,
    })
}

#[tokio::test]
async fn test_discovery_document_fetches_both_keys() {
    let server = MockServer::start().await;
    let document = unsigned_jwt(&json!({
        "issuer": server.uri(),
        "uri_puk_idp_enc": format!("{}/idpEnc/jwk.json", server.uri()),
        "uri_puk_idp_sig": format!("{}/idpSig/jwk.json", server.uri()),
    }));
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_string(document.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/idpEnc/jwk.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwk("puk_idp_enc")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/idpSig/jwk.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwk("puk_idp_sig")))
        .mount(&server)
        .await;

    let response = client(&server)
        .load_discovery_document(&endpoint(&server, "/.well-known/openid-configuration"))
        .await
        .unwrap();

    assert_eq!(response.document, document);
    assert_eq!(response.encryption_key.kid.as_deref(), Some("puk_idp_enc"));
    assert_eq!(response.signing_key.kid.as_deref(), Some("puk_idp_sig"));
}

#[tokio::test]
async fn test_verify_reads_code_from_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sign_response"))
        .and(body_string_contains("signed_challenge="))
        .respond_with(ResponseTemplate::new(302).insert_header(
            "Location",
            "https://redirect.example.com/erezept?code=the-code&ssotoken=the-sso&state=the-state",
        ))
        .mount(&server)
        .await;

    let token = client(&server)
        .verify(&endpoint(&server, "/sign_response"), &jwe())
        .await
        .unwrap();

    assert_eq!(token.code, "the-code");
    assert_eq!(token.sso_token.as_deref(), Some("the-sso"));
    assert_eq!(token.state, "the-state");
    assert_eq!(token.redirect, "https://redirect.example.com/erezept");
}

#[tokio::test]
async fn test_error_in_redirect_becomes_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sso_response"))
        .respond_with(ResponseTemplate::new(302).insert_header(
            "Location",
            "https://redirect.example.com/erezept?error=invalid_request&gematik_code=2040&state=s",
        ))
        .mount(&server)
        .await;

    let challenge = Jwt::parse(&unsigned_jwt(&json!({"exp": 0}))).unwrap();
    let error = client(&server)
        .sso_refresh(&endpoint(&server, "/sso_response"), &challenge, "sso")
        .await
        .unwrap_err();

    assert_eq!(error.server_code(), Some("2040"));
    assert!(matches!(error, IdpError::ServerError(response) if response.error == "invalid_request"));
}

#[tokio::test]
async fn test_json_error_body_becomes_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sign_response"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "gematik_code": "2030",
            "gematik_error_text": "challenge unknown",
        })))
        .mount(&server)
        .await;

    let error = client(&server)
        .verify(&endpoint(&server, "/sign_response"), &jwe())
        .await
        .unwrap_err();

    let IdpError::ServerError(response) = error else {
        panic!("expected server error, got {error:?}");
    };
    assert_eq!(response.status, 400);
    assert_eq!(response.code.as_deref(), Some("2030"));
    assert_eq!(response.description.as_deref(), Some("challenge unknown"));
}

#[tokio::test]
async fn test_unstructured_failure_is_a_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/directory/kk_apps"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let error = client(&server)
        .load_directory_kk_apps(&endpoint(&server, "/directory/kk_apps"))
        .await
        .unwrap_err();

    assert_eq!(error, IdpError::Network(NetworkError::HttpStatus { status: 500 }));
}

#[tokio::test]
async fn test_redirect_without_location_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sign_response"))
        .respond_with(ResponseTemplate::new(302))
        .mount(&server)
        .await;

    let error = client(&server)
        .verify(&endpoint(&server, "/sign_response"), &jwe())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        IdpError::Network(NetworkError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_device_calls_send_bearer_token() {
    let server = MockServer::start().await;
    let bearer = format!("Bearer {}", jwe().serialize());
    Mock::given(method("GET"))
        .and(path("/pairings"))
        .and(header("Authorization", bearer.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pairing_entries": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/pairings/key-id"))
        .and(header("Authorization", bearer.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let devices = client
        .list_devices(&endpoint(&server, "/pairings"), &jwe())
        .await
        .unwrap();
    assert!(devices.pairing_entries.is_empty());

    client
        .unregister_device(&endpoint(&server, "/pairings"), "key-id", &jwe())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_slow_idp_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/directory/kk_apps"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("a.b.c")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    let http_client = Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let error = HttpIdpClient::with_client(http_client)
        .load_directory_kk_apps(&endpoint(&server, "/directory/kk_apps"))
        .await
        .unwrap_err();

    assert_eq!(error, IdpError::Network(NetworkError::Timeout));
    assert!(error.is_network());
}
