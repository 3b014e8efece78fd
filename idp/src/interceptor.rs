//! Bearer token interceptor for authorized requests.
//!
//! The surrounding networking layer runs every request to an IDP-protected
//! service through [`BearerInterceptor::intercept`] and every response
//! through [`BearerInterceptor::handle_response`].

use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::lifecycle::TokenLifecycle;
use crate::providers::{CryptoPrimitives, IdpClient, IdpStorage, TrustStore};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Request, StatusCode};
use tracing::{debug, info};

/// Attaches the current access token and reacts to `401`.
pub struct BearerInterceptor<'a, C, P, T, S, K, E, D> {
    lifecycle: TokenLifecycle<'a, C, P, T, S, K, E, D>,
}

impl<'a, C, P, T, S, K, E, D> BearerInterceptor<'a, C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
{
    /// Create an interceptor over `env`.
    #[must_use]
    pub const fn new(env: &'a IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self {
            lifecycle: TokenLifecycle::new(env),
        }
    }

    /// Add `Authorization: Bearer <access token>` to `request`.
    ///
    /// The token is refreshed first if it has expired.
    ///
    /// # Errors
    ///
    /// - [`IdpError::TokenUnavailable`] if there is no usable token
    /// - [`IdpError::Network`] if a needed refresh failed in transport
    pub async fn intercept(&self, mut request: Request) -> Result<Request> {
        let token = self
            .lifecycle
            .auto_refreshed_token()
            .await?
            .ok_or(IdpError::TokenUnavailable)?;

        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.access_token))
            .map_err(|e| IdpError::Internal(format!("access token is not a header value: {e}")))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);

        debug!(url = %request.url(), "Bearer token attached");
        Ok(request)
    }

    /// Observe the status of an authorized response. A `401` clears the
    /// stored token; returns `true` in that case.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`] if the token cannot be cleared.
    pub async fn handle_response(&self, status: StatusCode) -> Result<bool> {
        if status != StatusCode::UNAUTHORIZED {
            return Ok(false);
        }
        info!("Authorized request rejected with 401, invalidating token");
        self.lifecycle.invalidate_access_token().await?;
        Ok(true)
    }
}
