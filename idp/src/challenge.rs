//! Challenge engine.
//!
//! Requests a signed challenge bound to fresh PKCE verifier, `state` and
//! `nonce` values, verifies it and packages it as a [`ChallengeSession`].

use crate::crypto::{CODE_CHALLENGE_METHOD, CryptoBox, code_challenge};
use crate::discovery::DiscoveryValidator;
use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::models::ChallengeSession;
use crate::providers::{ChallengeRequest, CryptoPrimitives, IdpClient, IdpStorage, TrustStore};
use chrono::{DateTime, Utc};
use futures::Stream;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Requests and verifies IDP challenges.
pub struct ChallengeEngine<'a, C, P, T, S, K, E, D> {
    env: &'a IdpEnvironment<C, P, T, S, K, E, D>,
}

impl<'a, C, P, T, S, K, E, D> ChallengeEngine<'a, C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
{
    /// Create an engine over `env`.
    #[must_use]
    pub const fn new(env: &'a IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self { env }
    }

    /// Request a fresh challenge.
    ///
    /// `redirect` defaults to the configured login redirect. Requesting with
    /// the pairing redirect switches to the pairing scope and marks the
    /// session (and the token it leads to) as a pairing flow.
    ///
    /// # Errors
    ///
    /// - [`IdpError::InvalidSignature`] if the challenge is not signed by the
    ///   discovery document's signing certificate
    /// - [`IdpError::ChallengeExpired`] if `exp <= now`
    /// - discovery and network errors
    pub async fn request_challenge(&self, redirect: Option<&str>) -> Result<ChallengeSession> {
        let config = &self.env.config;
        let document = DiscoveryValidator::new(self.env).load().await?;

        let crypto_box = CryptoBox::new();
        let verifier_code = crypto_box.generate_verifier_code();
        let state = crypto_box.generate_state();
        let nonce = crypto_box.generate_nonce();

        let redirect = redirect.unwrap_or(&config.redirect_uri).to_string();
        let pairing_flow = redirect == config.pairing_redirect_uri;

        let request = ChallengeRequest {
            client_id: config.client_id.clone(),
            state: state.clone(),
            redirect_uri: redirect.clone(),
            code_challenge: code_challenge(&verifier_code),
            code_challenge_method: CODE_CHALLENGE_METHOD.to_string(),
            response_type: "code".to_string(),
            nonce: nonce.clone(),
            scope: config.scope_for(pairing_flow),
        };

        let challenge = self
            .env
            .client
            .request_challenge(&document.payload.authorization_endpoint, &request)
            .await?;

        challenge
            .challenge
            .verify(&document.signing_certificate.public_key, &self.env.crypto)
            .map_err(|error| match error {
                IdpError::UnsupportedCurve(curve) => IdpError::UnsupportedCurve(curve),
                other => IdpError::InvalidSignature(format!("challenge: {other}")),
            })?;

        let expires_at = challenge.expires_at()?;
        if expires_at <= Utc::now() {
            return Err(IdpError::ChallengeExpired);
        }

        debug!(%expires_at, pairing_flow, "Challenge verified");

        Ok(ChallengeSession {
            challenge,
            verifier_code,
            state,
            nonce,
            redirect,
            pairing_flow,
            expires_at,
        })
    }

    /// Challenges that renew themselves as they expire.
    ///
    /// Yields a fresh session immediately and then again whenever the
    /// current one reaches its `exp`. The stream ends when `cancel` fires,
    /// after the first error, or after
    /// [`max_challenge_refreshes`](crate::config::IdpConfig::max_challenge_refreshes)
    /// renewals, whichever comes first. Consumers typically take the latest
    /// item and drop the stream once the user has signed.
    pub fn challenge_stream(
        &self,
        redirect: Option<&'a str>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<ChallengeSession>> + '_ {
        let max_refreshes = self.env.config.max_challenge_refreshes;
        let initial: Option<(Option<DateTime<Utc>>, usize)> = Some((None, 0));

        stream::unfold(initial, move |progress| {
            let cancel = cancel.clone();
            async move {
                let (previous_expiry, refreshes) = progress?;

                if let Some(expires_at) = previous_expiry {
                    if refreshes >= max_refreshes {
                        info!(refreshes, "Challenge refresh limit reached");
                        return None;
                    }
                    let wait = (expires_at - Utc::now()).to_std().unwrap_or_default();
                    tokio::select! {
                        () = cancel.cancelled() => return None,
                        () = tokio::time::sleep(wait) => {}
                    }
                } else if cancel.is_cancelled() {
                    return None;
                }

                match self.request_challenge(redirect).await {
                    Ok(session) => {
                        let refreshes = refreshes + usize::from(previous_expiry.is_some());
                        let next = Some((Some(session.expires_at), refreshes));
                        Some((Ok(session), next))
                    }
                    Err(error) => Some((Err(error), None)),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockIdp;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_request_challenge_binds_client_values() {
        let idp = MockIdp::new();
        let env = idp.environment();

        let session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
        let claims = session.challenge.claims().unwrap();

        assert_eq!(session.verifier_code.len(), 43);
        assert_eq!(claims.state.as_deref(), Some(session.state.as_str()));
        assert_eq!(claims.nonce.as_deref(), Some(session.nonce.as_str()));
        assert_eq!(
            claims.code_challenge,
            Some(code_challenge(&session.verifier_code))
        );
        assert!(!session.pairing_flow);
        assert_eq!(session.redirect, env.config.redirect_uri);
    }

    #[tokio::test]
    async fn test_pairing_redirect_selects_pairing_flow() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let redirect = env.config.pairing_redirect_uri.clone();

        let session = ChallengeEngine::new(&env)
            .request_challenge(Some(&redirect))
            .await
            .unwrap();

        assert!(session.pairing_flow);
        assert_eq!(session.challenge.claims().unwrap().scope.as_deref(), Some("pairing openid"));
    }

    #[tokio::test]
    async fn test_forged_challenge_is_rejected() {
        let idp = MockIdp::new();
        idp.set_forge_challenges(true);
        let env = idp.environment();

        let result = ChallengeEngine::new(&env).request_challenge(None).await;

        assert!(matches!(result, Err(IdpError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_expired_challenge_is_rejected() {
        let idp = MockIdp::new();
        idp.set_challenge_lifetime(chrono::Duration::seconds(-1));
        let env = idp.environment();

        let result = ChallengeEngine::new(&env).request_challenge(None).await;

        assert!(matches!(result, Err(IdpError::ChallengeExpired)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_stream_is_bounded() {
        let idp = MockIdp::new();
        idp.set_challenge_lifetime(chrono::Duration::seconds(2));
        let mut env = idp.environment();
        env.config.max_challenge_refreshes = 2;
        let engine = ChallengeEngine::new(&env);

        let sessions: Vec<_> = engine
            .challenge_stream(None, CancellationToken::new())
            .collect()
            .await;

        // initial challenge plus two renewals
        assert_eq!(sessions.len(), 3);
        assert!(sessions.iter().all(Result::is_ok));
        assert_eq!(idp.call_count("request_challenge"), 3);
    }

    #[tokio::test]
    async fn test_challenge_stream_stops_on_cancel() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let engine = ChallengeEngine::new(&env);
        let cancel = CancellationToken::new();

        let mut stream = Box::pin(engine.challenge_stream(None, cancel.clone()));
        assert!(stream.next().await.unwrap().is_ok());

        cancel.cancel();
        assert!(stream.next().await.is_none());
        assert_eq!(idp.call_count("request_challenge"), 1);
    }
}
