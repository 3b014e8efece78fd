//! `reqwest` implementation of [`IdpClient`].

use super::idp_client::{ChallengeRequest, IdpClient, TokenRequest};
use crate::config::IdpConfig;
use crate::crypto::{Jwe, Jwk, Jwt};
use crate::error::{IdpError, NetworkError, Result, ServerErrorResponse};
use crate::models::{
    DiscoveryDocumentResponse, ExchangeToken, ExtAuthRequest, ExtAuthVerify, IdpChallenge,
    PairingEntries, PairingEntry, TokenResponse,
};
use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, Response, redirect};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

/// IDP client speaking HTTPS.
///
/// Redirects are not followed: the IDP answers verify and external
/// authentication calls with a `302` whose `Location` carries the
/// authorization code.
///
/// # Example
///
/// ```no_run
/// use erezept_idp::config::IdpConfig;
/// use erezept_idp::providers::HttpIdpClient;
///
/// let client = HttpIdpClient::new(&IdpConfig::from_env())?;
/// # Ok::<(), erezept_idp::error::IdpError>(())
/// ```
#[derive(Clone, Debug)]
pub struct HttpIdpClient {
    /// HTTP client for making requests.
    http_client: Client,
}

/// Key locations read from the (not yet verified) discovery document.
#[derive(Deserialize)]
struct KeyLocations {
    uri_puk_idp_enc: Url,
    uri_puk_idp_sig: Url,
}

impl HttpIdpClient {
    /// Create a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Internal`] if the TLS backend cannot be
    /// initialised.
    pub fn new(config: &IdpConfig) -> Result<Self> {
        let http_client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.request_timeout)
            .user_agent(concat!("erezept-idp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IdpError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http_client })
    }

    /// Wrap an existing client. It must not follow redirects.
    #[must_use]
    pub const fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let response = Self::send(self.http_client.get(url.clone())).await?;
        parse_json(response).await
    }

    async fn get_jwt(&self, url: &Url) -> Result<Jwt> {
        let response = Self::send(self.http_client.get(url.clone())).await?;
        let body = response.text().await.map_err(transport_error)?;
        Jwt::parse(&body)
    }

    async fn exchange_token_from(request: RequestBuilder) -> Result<ExchangeToken> {
        let response = Self::send(request).await?;
        ExchangeToken::from_redirect(&redirect_location(&response)?)
    }
}

impl IdpClient for HttpIdpClient {
    async fn load_discovery_document(&self, url: &Url) -> Result<DiscoveryDocumentResponse> {
        tracing::debug!(url = %url, "Fetching discovery document");

        let document = self.get_jwt(url).await?;
        let locations: KeyLocations = document.claims()?;
        let encryption_key: Jwk = self.get_json(&locations.uri_puk_idp_enc).await?;
        let signing_key: Jwk = self.get_json(&locations.uri_puk_idp_sig).await?;

        Ok(DiscoveryDocumentResponse {
            document: document.serialize(),
            encryption_key,
            signing_key,
        })
    }

    async fn request_challenge(
        &self,
        endpoint: &Url,
        request: &ChallengeRequest,
    ) -> Result<IdpChallenge> {
        let response = Self::send(self.http_client.get(endpoint.clone()).query(request)).await?;
        parse_json(response).await
    }

    async fn verify(&self, endpoint: &Url, signed_challenge: &Jwe) -> Result<ExchangeToken> {
        let form = [("signed_challenge", signed_challenge.serialize())];
        Self::exchange_token_from(self.http_client.post(endpoint.clone()).form(&form)).await
    }

    async fn alt_verify(&self, endpoint: &Url, authentication_data: &Jwe) -> Result<ExchangeToken> {
        let form = [(
            "encrypted_signed_authentication_data",
            authentication_data.serialize(),
        )];
        Self::exchange_token_from(self.http_client.post(endpoint.clone()).form(&form)).await
    }

    async fn sso_refresh(
        &self,
        endpoint: &Url,
        challenge: &Jwt,
        sso_token: &str,
    ) -> Result<ExchangeToken> {
        let form = [
            ("ssotoken", sso_token.to_string()),
            ("unsigned_challenge", challenge.serialize()),
        ];
        Self::exchange_token_from(self.http_client.post(endpoint.clone()).form(&form)).await
    }

    async fn exchange(&self, endpoint: &Url, request: &TokenRequest) -> Result<TokenResponse> {
        let response = Self::send(self.http_client.post(endpoint.clone()).form(request)).await?;
        parse_json(response).await
    }

    async fn register_device(
        &self,
        endpoint: &Url,
        registration_data: &Jwe,
        access_token: &Jwe,
    ) -> Result<PairingEntry> {
        let form = [("encrypted_registration_data", registration_data.serialize())];
        let request = self
            .http_client
            .post(endpoint.clone())
            .bearer_auth(access_token.serialize())
            .form(&form);
        parse_json(Self::send(request).await?).await
    }

    async fn unregister_device(
        &self,
        endpoint: &Url,
        key_identifier: &str,
        access_token: &Jwe,
    ) -> Result<()> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| IdpError::Internal(format!("{endpoint} cannot be a base URL")))?
            .pop_if_empty()
            .push(key_identifier);
        let request = self
            .http_client
            .delete(url)
            .bearer_auth(access_token.serialize());
        Self::send(request).await?;
        Ok(())
    }

    async fn list_devices(&self, endpoint: &Url, access_token: &Jwe) -> Result<PairingEntries> {
        let request = self
            .http_client
            .get(endpoint.clone())
            .bearer_auth(access_token.serialize());
        parse_json(Self::send(request).await?).await
    }

    async fn load_directory_kk_apps(&self, endpoint: &Url) -> Result<Jwt> {
        self.get_jwt(endpoint).await
    }

    async fn start_ext_auth(&self, endpoint: &Url, request: &ExtAuthRequest) -> Result<Url> {
        let response = Self::send(self.http_client.get(endpoint.clone()).query(request)).await?;
        redirect_location(&response)
    }

    async fn ext_auth_verify(&self, endpoint: &Url, verify: &ExtAuthVerify) -> Result<ExchangeToken> {
        Self::exchange_token_from(self.http_client.post(endpoint.clone()).form(verify)).await
    }
}

fn transport_error(error: reqwest::Error) -> IdpError {
    if error.is_timeout() {
        NetworkError::Timeout.into()
    } else {
        NetworkError::Transport(error.to_string()).into()
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body)
        .map_err(|e| NetworkError::MalformedResponse(format!("unexpected body: {e}")).into())
}

/// Structured JSON error bodies become [`IdpError::ServerError`], anything
/// else a bare status error.
async fn error_from_response(response: Response) -> IdpError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ServerErrorResponse>(&body) {
        Ok(mut error) if !error.error.is_empty() || error.code.is_some() => {
            tracing::warn!(status, error = %error.error, code = ?error.code, "IDP returned an error");
            error.status = status;
            IdpError::ServerError(error)
        }
        _ => NetworkError::HttpStatus { status }.into(),
    }
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Resolve the `Location` header. Errors the IDP reports through the
/// redirect (`?error=...`) surface as [`IdpError::ServerError`].
fn redirect_location(response: &Response) -> Result<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| NetworkError::MalformedResponse("missing Location header".to_string()))?;
    let url = response
        .url()
        .join(location)
        .map_err(|e| NetworkError::MalformedResponse(format!("invalid Location header: {e}")))?;

    if let Some(error) = query_value(&url, "error") {
        return Err(IdpError::ServerError(ServerErrorResponse {
            status: response.status().as_u16(),
            error,
            code: query_value(&url, "gematik_code"),
            description: query_value(&url, "error_description"),
        }));
    }
    Ok(url)
}
