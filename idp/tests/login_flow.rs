//! Health card login against the in-process IDP.
//!
//! Covers the happy path plus every check that must abort a login:
//! discovery validity and trust, challenge signature, `state` echo, ID
//! token `nonce` and signature.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use erezept_idp::challenge::ChallengeEngine;
use erezept_idp::crypto::Jwt;
use erezept_idp::discovery::DiscoveryValidator;
use erezept_idp::error::{IdpError, NetworkError};
use erezept_idp::exchange::{ExchangeEngine, accept_any_id_token};
use erezept_idp::mocks::{MockIdp, MockSigner, MockTrustStore};
use erezept_idp::models::IdTokenPayload;
use erezept_idp::providers::IdpStorage;
use erezept_idp::{IdpSession, TokenState};

#[tokio::test]
async fn test_card_login_yields_nonce_bound_token() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let card = MockSigner::brainpool();

    let session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
    let signed = session.sign(&card, &card.certificate()).await.unwrap();
    let token = ExchangeEngine::new(&env)
        .verify_and_exchange(&signed, accept_any_id_token)
        .await
        .unwrap();

    let id_token: IdTokenPayload = Jwt::parse(&token.id_token).unwrap().claims().unwrap();
    assert_eq!(id_token.nonce.as_deref(), Some(session.nonce.as_str()));
    assert_eq!(id_token.id_number.as_deref(), Some("X110498793"));
    assert!(token.sso_token.is_some());
    assert!(!token.is_pairing_token);
    assert_eq!(token.redirect, env.config.redirect_uri);

    // persisted exactly as returned
    assert_eq!(env.storage.token().await.unwrap(), Some(token));
}

#[tokio::test]
async fn test_validator_sees_id_token_claims() {
    let idp = MockIdp::new();
    let session = IdpSession::new(idp.environment());
    let card = MockSigner::brainpool();

    let token = session
        .login_with_card(&card, &card.certificate(), |payload: &IdTokenPayload| {
            if payload.organization_name.as_deref() == Some("Mock Krankenkasse") {
                Ok(())
            } else {
                Err("unexpected insurer")
            }
        })
        .await
        .unwrap();

    assert!(!token.is_expired());
    assert_eq!(session.lifecycle().state().await.unwrap(), TokenState::Valid);
}

#[tokio::test]
async fn test_wrong_nonce_aborts_without_persisting() {
    let idp = MockIdp::new();
    idp.set_wrong_nonce(true);
    let session = IdpSession::new(idp.environment());
    let card = MockSigner::brainpool();

    let result = session
        .login_with_card(&card, &card.certificate(), accept_any_id_token)
        .await;

    assert!(matches!(result, Err(IdpError::InvalidNonce)));
    assert!(!session.is_logged_in().await.unwrap());
}

#[tokio::test]
async fn test_tampered_state_never_reaches_exchange() {
    let idp = MockIdp::new();
    idp.set_tamper_state(true);
    let session = IdpSession::new(idp.environment());
    let card = MockSigner::brainpool();

    let result = session
        .login_with_card(&card, &card.certificate(), accept_any_id_token)
        .await;

    assert!(matches!(result, Err(IdpError::InvalidStateParameter)));
    assert_eq!(idp.call_count("exchange"), 0);
}

#[tokio::test]
async fn test_forged_challenge_is_never_signed() {
    let idp = MockIdp::new();
    idp.set_forge_challenges(true);
    let session = IdpSession::new(idp.environment());
    let card = MockSigner::brainpool();

    let result = session
        .login_with_card(&card, &card.certificate(), accept_any_id_token)
        .await;

    assert!(matches!(result, Err(IdpError::InvalidSignature(_))));
    assert_eq!(idp.call_count("verify"), 0);
}

#[tokio::test]
async fn test_card_signature_is_checked_by_idp() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let card = MockSigner::brainpool();
    let other_card = MockSigner::brainpool();

    let session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
    // certificate does not belong to the signing card
    let signed = session.sign(&card, &other_card.certificate()).await.unwrap();
    let result = ExchangeEngine::new(&env).verify(&signed).await;

    assert!(matches!(result, Err(IdpError::ServerError(_))));
}

#[tokio::test]
async fn test_challenge_is_single_use() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let card = MockSigner::brainpool();
    let engine = ExchangeEngine::new(&env);

    let session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
    let signed = session.sign(&card, &card.certificate()).await.unwrap();
    engine.verify(&signed).await.unwrap();

    let replay = engine.verify(&signed).await;
    assert_eq!(
        replay.unwrap_err().server_code(),
        Some("2030"),
        "a replayed challenge must be refused by the IDP"
    );
}

#[tokio::test]
async fn test_expired_discovery_document_is_rejected() {
    let idp = MockIdp::new();
    idp.set_expired_discovery(true);
    let env = idp.environment();

    let result = DiscoveryValidator::new(&env).load().await;

    assert!(matches!(result, Err(IdpError::InvalidDiscoveryDocument(_))));
    assert!(env.storage.discovery_document().await.unwrap().is_none());
}

#[tokio::test]
async fn test_p256_signed_discovery_document_is_rejected() {
    let idp = MockIdp::new();
    idp.set_discovery_curve_p256(true);
    let env = idp.environment();

    let result = DiscoveryValidator::new(&env).load().await;

    assert!(matches!(result, Err(IdpError::UnsupportedCurve(curve)) if curve == "P-256"));
}

#[tokio::test]
async fn test_untrusted_idp_blocks_login() {
    let idp = MockIdp::new();
    let session = IdpSession::new(idp.environment_with_trust_store(MockTrustStore::rejecting()));
    let card = MockSigner::brainpool();

    let result = session
        .login_with_card(&card, &card.certificate(), accept_any_id_token)
        .await;

    assert!(matches!(result, Err(IdpError::TrustStore(_))));
    assert_eq!(idp.call_count("request_challenge"), 0);
}

#[tokio::test]
async fn test_concurrent_cold_start_fetches_once() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let validator = DiscoveryValidator::new(&env);

    let (a, b, c) = tokio::join!(validator.load(), validator.load(), validator.load());

    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
    assert_eq!(idp.call_count("load_discovery_document"), 1);
}

#[tokio::test]
async fn test_discovery_network_failure_is_not_cached() {
    let idp = MockIdp::new();
    idp.fail_next("load_discovery_document", NetworkError::Timeout.into());
    let env = idp.environment();
    let validator = DiscoveryValidator::new(&env);

    let first = validator.load().await;
    assert!(first.unwrap_err().is_network());

    validator.load().await.unwrap();
    assert_eq!(idp.call_count("load_discovery_document"), 2);
}

#[tokio::test]
async fn test_cleared_discovery_document_is_refetched() {
    let idp = MockIdp::new();
    let env = idp.environment();
    let validator = DiscoveryValidator::new(&env);

    validator.load().await.unwrap();
    validator.clear().await.unwrap();
    validator.load().await.unwrap();

    assert_eq!(idp.call_count("load_discovery_document"), 2);
}
