//! In-process IDP.
//!
//! Implements the server side of every [`IdpClient`] call with the mock
//! crypto: it issues signed discovery documents and challenges, decrypts
//! what the client sends, checks card and device signatures, PKCE and
//! redirects, and returns `dir` encrypted token bundles. Switches on
//! [`MockIdp`] make it misbehave in specific ways.

use super::{MockCrypto, MockKeyContainer, MockSigner, MockTrustStore};
use crate::config::IdpConfig;
use crate::crypto::jwt::NestedJwt;
use crate::crypto::{
    AesKey, CryptoBox, EcPublicKey, Jwe, Jwk, Jwt, JwtHeader, base64url_decode, code_challenge,
};
use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result, ServerErrorResponse};
use crate::exchange::CONTENT_TYPE_NJWT;
use crate::models::{
    AuthenticationData, DeviceInformation, DeviceType, DiscoveryDocumentResponse, ExchangeToken,
    ExtAuthRequest, ExtAuthVerify, IdpChallenge, KkAppDirectory, KkAppEntry, PairingEntries,
    PairingEntry, RegistrationData, TokenResponse, UserConsent,
};
use crate::providers::{
    ChallengeRequest, CryptoPrimitives, IdpClient, KeyVerifier, StaticDeviceInfo, TokenRequest,
};
use crate::state::ProfileId;
use crate::stores::{MemoryExtAuthRequestStorage, MemoryIdpStorage};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

/// Base URL of every mock endpoint.
pub const MOCK_IDP_URL: &str = "https://idp.example.com";

/// Environment wired to a [`MockIdp`] and in-memory collaborators.
pub type MockEnvironment = IdpEnvironment<
    MockIdp,
    MockCrypto,
    MockTrustStore,
    MemoryIdpStorage,
    MockKeyContainer,
    MemoryExtAuthRequestStorage,
    StaticDeviceInfo,
>;

/// What the IDP remembers between authorization steps.
#[derive(Debug, Clone)]
struct PendingAuthorization {
    state: String,
    nonce: String,
    code_challenge: String,
    redirect_uri: String,
    scope: String,
}

#[derive(Debug)]
struct MockIdpState {
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, IdpError>,
    forge_challenges: bool,
    challenge_lifetime: Duration,
    token_lifetime: Duration,
    reported_expires_in: Option<i64>,
    tamper_state: bool,
    wrong_nonce: bool,
    expired_discovery: bool,
    discovery_curve_p256: bool,
    challenges: HashMap<String, PendingAuthorization>,
    codes: HashMap<String, PendingAuthorization>,
    sso_tokens: HashSet<String>,
    access_tokens: HashMap<String, String>,
    devices: Vec<PairingEntry>,
    ext_auth: HashMap<String, PendingAuthorization>,
    kk_codes: HashMap<String, String>,
}

impl Default for MockIdpState {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
            failures: HashMap::new(),
            forge_challenges: false,
            challenge_lifetime: Duration::minutes(5),
            token_lifetime: Duration::minutes(5),
            reported_expires_in: None,
            tamper_state: false,
            wrong_nonce: false,
            expired_discovery: false,
            discovery_curve_p256: false,
            challenges: HashMap::new(),
            codes: HashMap::new(),
            sso_tokens: HashSet::new(),
            access_tokens: HashMap::new(),
            devices: Vec::new(),
            ext_auth: HashMap::new(),
            kk_codes: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    crypto: MockCrypto,
    discovery_signer: MockSigner,
    p256_discovery_signer: MockSigner,
    signing: MockSigner,
    encryption_key: EcPublicKey,
    state: Mutex<MockIdpState>,
}

/// A complete IDP living in memory. Clones share state.
#[derive(Debug, Clone)]
pub struct MockIdp {
    inner: Arc<Inner>,
}

impl Default for MockIdp {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdp {
    /// Create an IDP with fresh keys.
    #[must_use]
    pub fn new() -> Self {
        let crypto = MockCrypto::new();
        Self {
            inner: Arc::new(Inner {
                crypto,
                discovery_signer: MockSigner::brainpool(),
                p256_discovery_signer: MockSigner::p256(),
                signing: MockSigner::brainpool(),
                encryption_key: crypto.generate_brainpool_key(),
                state: Mutex::new(MockIdpState::default()),
            }),
        }
    }

    /// Configuration pointing at this IDP.
    #[must_use]
    pub fn config() -> IdpConfig {
        IdpConfig::new(
            format!("{MOCK_IDP_URL}/.well-known/openid-configuration"),
            "https://redirect.example.com/erezept".to_string(),
        )
        .with_pairing_redirect_uri("https://redirect.example.com/erezept/pairing".to_string())
        .with_ext_auth_redirect_uri("https://redirect.example.com/extauth".to_string())
    }

    /// Fresh environment (new profile, empty stores, trusting trust store).
    #[must_use]
    pub fn environment(&self) -> MockEnvironment {
        self.environment_with_trust_store(MockTrustStore::accepting())
    }

    /// Fresh environment using `trust_store`.
    #[must_use]
    pub fn environment_with_trust_store(&self, trust_store: MockTrustStore) -> MockEnvironment {
        IdpEnvironment::new(
            Self::config(),
            ProfileId::new(),
            self.clone(),
            self.inner.crypto,
            trust_store,
            MemoryIdpStorage::new(),
            MockKeyContainer::new(),
            MemoryExtAuthRequestStorage::new(),
            StaticDeviceInfo(mock_device_information()),
        )
    }

    /// The crypto primitives the IDP's keys work with.
    #[must_use]
    pub fn crypto(&self) -> MockCrypto {
        self.inner.crypto
    }

    /// Encryption key as published.
    #[must_use]
    pub fn encryption_jwk(&self) -> Jwk {
        let mut jwk = self.inner.encryption_key.to_jwk();
        jwk.kid = Some("puk_idp_enc".to_string());
        jwk.key_use = Some("enc".to_string());
        jwk
    }

    /// Signing key (with certificate) as published.
    #[must_use]
    pub fn signing_jwk(&self) -> Jwk {
        let mut jwk = self.inner.signing.public_key().to_jwk();
        jwk.kid = Some("puk_idp_sig".to_string());
        jwk.key_use = Some("sig".to_string());
        jwk.x5c = Some(vec![self.inner.signing.certificate().to_base64()]);
        jwk
    }

    /// A freshly signed discovery document.
    #[must_use]
    pub fn discovery_response(&self) -> DiscoveryDocumentResponse {
        let (expired, p256) = {
            let state = self.state();
            (state.expired_discovery, state.discovery_curve_p256)
        };
        let now = Utc::now();
        let (iat, exp) = if expired {
            (now - Duration::hours(25), now - Duration::hours(1))
        } else {
            (now - Duration::minutes(1), now + Duration::hours(24))
        };
        let claims = json!({
            "issuer": MOCK_IDP_URL,
            "iat": iat.timestamp(),
            "exp": exp.timestamp(),
            "authorization_endpoint": endpoint("sign_response"),
            "sso_endpoint": endpoint("sso_response"),
            "token_endpoint": endpoint("token"),
            "auth_pair_endpoint": endpoint("alt_response"),
            "uri_pair": endpoint("pairings"),
            "uri_puk_idp_enc": endpoint("idpEnc/jwk.json"),
            "uri_puk_idp_sig": endpoint("idpSig/jwk.json"),
            "kk_app_list_uri": endpoint("directory/kk_apps"),
            "third_party_authorization_endpoint": endpoint("extauth"),
            "federation_authorization_endpoint": endpoint("fedauth"),
        });
        let signer = if p256 {
            &self.inner.p256_discovery_signer
        } else {
            &self.inner.discovery_signer
        };
        let header = JwtHeader::new(signer.public_key().curve.jws_algorithm())
            .with_certificate(signer.certificate().to_base64());
        let document = signer
            .sign_sync(&header, &claims)
            .expect("discovery claims serialize");

        DiscoveryDocumentResponse {
            document: document.serialize(),
            encryption_key: self.encryption_jwk(),
            signing_key: self.signing_jwk(),
        }
    }

    /// Directory entries served by the mock: a fast-track statutory
    /// insurer, a fast-track private insurer and a GID insurer.
    #[must_use]
    pub fn kk_apps() -> Vec<KkAppEntry> {
        vec![
            KkAppEntry {
                kk_app_name: "Mock Krankenkasse".to_string(),
                kk_app_id: "kkAppId001".to_string(),
                kk_app_gid: false,
                kk_app_pkv: false,
            },
            KkAppEntry {
                kk_app_name: "Mock Private Krankenversicherung".to_string(),
                kk_app_id: "kkAppId002".to_string(),
                kk_app_gid: false,
                kk_app_pkv: true,
            },
            KkAppEntry {
                kk_app_name: "Mock GID Kasse".to_string(),
                kk_app_id: "kkAppId003".to_string(),
                kk_app_gid: true,
                kk_app_pkv: false,
            },
        ]
    }

    /// What the insurance app does after the user approved: redirect to
    /// `redirect` with a code and the state carried by `location`.
    #[must_use]
    pub fn insurance_app_callback(&self, location: &Url, redirect: &str) -> Url {
        let state = location
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        let code = format!("kk-{}", random_value());
        self.state().kk_codes.insert(code.clone(), state.clone());

        let mut callback = Url::parse(redirect).expect("valid callback redirect");
        callback
            .query_pairs_mut()
            .append_pair("code", &code)
            .append_pair("state", &state);
        callback
    }

    /// Number of calls to the [`IdpClient`] method `method`.
    #[must_use]
    pub fn call_count(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    /// Fail the next call to `method` with `error`.
    pub fn fail_next(&self, method: &'static str, error: IdpError) {
        self.state().failures.insert(method, error);
    }

    /// Sign challenges with an unrelated key.
    pub fn set_forge_challenges(&self, forge: bool) {
        self.state().forge_challenges = forge;
    }

    /// Lifetime of issued challenges.
    pub fn set_challenge_lifetime(&self, lifetime: Duration) {
        self.state().challenge_lifetime = lifetime;
    }

    /// Lifetime of issued access tokens.
    pub fn set_token_lifetime(&self, lifetime: Duration) {
        self.state().token_lifetime = lifetime;
    }

    /// Report `expires_in` in token responses instead of the real lifetime.
    pub fn set_reported_expires_in(&self, expires_in: Option<i64>) {
        self.state().reported_expires_in = expires_in;
    }

    /// Echo a wrong `state` from verify steps.
    pub fn set_tamper_state(&self, tamper: bool) {
        self.state().tamper_state = tamper;
    }

    /// Put a wrong `nonce` into ID tokens.
    pub fn set_wrong_nonce(&self, wrong: bool) {
        self.state().wrong_nonce = wrong;
    }

    /// Serve a discovery document whose validity ended an hour ago.
    pub fn set_expired_discovery(&self, expired: bool) {
        self.state().expired_discovery = expired;
    }

    /// Sign the discovery document with a P-256 key.
    pub fn set_discovery_curve_p256(&self, p256: bool) {
        self.state().discovery_curve_p256 = p256;
    }

    /// Forget every issued SSO token.
    pub fn revoke_sso_tokens(&self) {
        self.state().sso_tokens.clear();
    }

    /// Registered devices.
    #[must_use]
    pub fn registered_devices(&self) -> Vec<PairingEntry> {
        self.state().devices.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockIdpState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log a call and surface a queued failure.
    fn record(&self, method: &'static str) -> Result<()> {
        let mut state = self.state();
        *state.calls.entry(method).or_default() += 1;
        state.failures.remove(method).map_or(Ok(()), Err)
    }

    fn decrypt_nested(&self, jwe: &Jwe) -> Result<String> {
        let plaintext = self.decrypt(jwe)?;
        let nested: NestedJwt = serde_json::from_slice(&plaintext).map_err(|_| rejected(400, "invalid_request"))?;
        Ok(nested.njwt)
    }

    fn decrypt(&self, jwe: &Jwe) -> Result<Vec<u8>> {
        let epk = jwe
            .header()
            .ok()
            .and_then(|header| header.epk)
            .and_then(|jwk| EcPublicKey::from_jwk(&jwk).ok())
            .ok_or_else(|| rejected(400, "invalid_request"))?;
        let shared_secret = MockCrypto::shared_secret(&self.inner.encryption_key, &epk);
        jwe.decrypt_with_shared_secret(&shared_secret)
            .map_err(|_| rejected(400, "invalid_request"))
    }

    /// Check a token's signature against the certificate in its `x5c`.
    fn verify_with_x5c(&self, jwt: &Jwt) -> Result<()> {
        let certificate = jwt
            .header()
            .ok()
            .and_then(|header| header.x5c)
            .and_then(|chain| chain.into_iter().next())
            .and_then(|entry| crate::crypto::X509Certificate::from_base64(&entry, &self.inner.crypto).ok())
            .ok_or_else(|| rejected(400, "invalid_request"))?;
        self.verify_with(jwt, &certificate.public_key)
    }

    fn verify_with(&self, jwt: &Jwt, key: &EcPublicKey) -> Result<()> {
        let signature = jwt.signature().map_err(|_| rejected(400, "invalid_request"))?;
        if self
            .inner
            .crypto
            .verify(key, jwt.signing_input().as_bytes(), &signature)?
        {
            Ok(())
        } else {
            Err(rejected_with_code(400, "invalid_request", "2020"))
        }
    }

    /// Pending authorization of a challenge the IDP issued and that has not
    /// expired yet.
    fn take_challenge(&self, challenge: &str) -> Result<PendingAuthorization> {
        let jwt = Jwt::parse(challenge).map_err(|_| rejected(400, "invalid_request"))?;
        let exp = jwt
            .claims::<serde_json::Value>()
            .ok()
            .and_then(|claims| claims["exp"].as_i64())
            .unwrap_or_default();
        if exp <= Utc::now().timestamp() {
            return Err(rejected_with_code(400, "invalid_request", "2032"));
        }
        self.state()
            .challenges
            .remove(challenge)
            .ok_or_else(|| rejected_with_code(400, "invalid_request", "2030"))
    }

    /// Issue an authorization code (and optionally an SSO token).
    fn authorize(&self, pending: PendingAuthorization, with_sso: bool) -> ExchangeToken {
        let code = random_value();
        let sso_token = with_sso.then(|| format!("sso-{}", random_value()));
        let mut state = self.state();
        if let Some(sso) = &sso_token {
            state.sso_tokens.insert(sso.clone());
        }
        let echoed_state = if state.tamper_state {
            "tampered-state".to_string()
        } else {
            pending.state.clone()
        };
        let redirect = pending.redirect_uri.clone();
        state.codes.insert(code.clone(), pending);
        ExchangeToken {
            code,
            sso_token,
            state: echoed_state,
            redirect,
        }
    }

    /// Scope of an encrypted access token presented as bearer.
    fn bearer_scope(&self, access_token: &Jwe) -> Result<String> {
        let token = self
            .decrypt_nested(access_token)
            .map_err(|_| rejected(401, "invalid_token"))?;
        self.state()
            .access_tokens
            .get(&token)
            .cloned()
            .ok_or_else(|| rejected(401, "invalid_token"))
    }

    fn issue_token(&self, claims: &serde_json::Value, key: &AesKey) -> Result<(Jwe, String)> {
        let header = JwtHeader::new(self.inner.signing.public_key().curve.jws_algorithm());
        let jwt = self.inner.signing.sign_sync(&header, claims)?.serialize();
        let nested = serde_json::to_vec(&NestedJwt { njwt: jwt.clone() })?;
        Ok((Jwe::encrypt_direct(&nested, key, CONTENT_TYPE_NJWT)?, jwt))
    }
}

impl IdpClient for MockIdp {
    async fn load_discovery_document(&self, _url: &Url) -> Result<DiscoveryDocumentResponse> {
        self.record("load_discovery_document")?;
        tokio::task::yield_now().await;
        Ok(self.discovery_response())
    }

    async fn request_challenge(
        &self,
        _endpoint: &Url,
        request: &ChallengeRequest,
    ) -> Result<IdpChallenge> {
        self.record("request_challenge")?;
        let (forge, lifetime) = {
            let state = self.state();
            (state.forge_challenges, state.challenge_lifetime)
        };
        let now = Utc::now();
        let claims = json!({
            "iss": MOCK_IDP_URL,
            "iat": now.timestamp(),
            "exp": (now + lifetime).timestamp(),
            "token_type": "challenge",
            "jti": random_value(),
            "client_id": request.client_id,
            "response_type": request.response_type,
            "redirect_uri": request.redirect_uri,
            "scope": request.scope,
            "state": request.state,
            "nonce": request.nonce,
            "code_challenge": request.code_challenge,
            "code_challenge_method": request.code_challenge_method,
        });
        let signer = if forge {
            MockSigner::brainpool()
        } else {
            self.inner.signing.clone()
        };
        let header = JwtHeader::new(signer.public_key().curve.jws_algorithm());
        let challenge = signer.sign_sync(&header, &claims)?;

        self.state().challenges.insert(
            challenge.serialize(),
            PendingAuthorization {
                state: request.state.clone(),
                nonce: request.nonce.clone(),
                code_challenge: request.code_challenge.clone(),
                redirect_uri: request.redirect_uri.clone(),
                scope: request.scope.clone(),
            },
        );

        Ok(IdpChallenge {
            challenge,
            user_consent: Some(UserConsent {
                requested_scopes: request
                    .scope
                    .split(' ')
                    .map(|scope| (scope.to_string(), format!("Access to {scope}")))
                    .collect(),
                requested_claims: HashMap::from([(
                    "given_name".to_string(),
                    "Given name".to_string(),
                )]),
            }),
        })
    }

    async fn verify(&self, _endpoint: &Url, signed_challenge: &Jwe) -> Result<ExchangeToken> {
        self.record("verify")?;
        let signed = Jwt::parse(&self.decrypt_nested(signed_challenge)?)
            .map_err(|_| rejected(400, "invalid_request"))?;
        self.verify_with_x5c(&signed)?;
        let challenge: NestedJwt = signed
            .claims()
            .map_err(|_| rejected(400, "invalid_request"))?;
        let pending = self.take_challenge(&challenge.njwt)?;
        Ok(self.authorize(pending, true))
    }

    async fn alt_verify(&self, _endpoint: &Url, authentication_data: &Jwe) -> Result<ExchangeToken> {
        self.record("alt_verify")?;
        let signed = Jwt::parse(&self.decrypt_nested(authentication_data)?)
            .map_err(|_| rejected(400, "invalid_request"))?;
        let data: AuthenticationData = signed
            .claims()
            .map_err(|_| rejected(400, "invalid_request"))?;

        let devices = self.registered_devices();
        let device_key = devices
            .iter()
            .filter_map(|entry| entry.pairing_data().ok())
            .find(|pairing| pairing.key_identifier == data.key_identifier)
            .map(|pairing| pairing.se_subject_public_key_info)
            .ok_or_else(|| rejected_with_code(400, "invalid_request", "2000"))?;
        let device_key = base64url_decode(&device_key)
            .ok()
            .and_then(|spki| MockCrypto::public_key_from_spki(&spki).ok())
            .ok_or_else(|| rejected(400, "invalid_request"))?;
        self.verify_with(&signed, &device_key)?;

        let pending = self.take_challenge(&data.challenge_token)?;
        Ok(self.authorize(pending, true))
    }

    async fn sso_refresh(
        &self,
        _endpoint: &Url,
        challenge: &Jwt,
        sso_token: &str,
    ) -> Result<ExchangeToken> {
        self.record("sso_refresh")?;
        if !self.state().sso_tokens.contains(sso_token) {
            return Err(rejected_with_code(400, "invalid_request", "2040"));
        }
        let pending = self.take_challenge(&challenge.serialize())?;
        Ok(self.authorize(pending, false))
    }

    async fn exchange(&self, _endpoint: &Url, request: &TokenRequest) -> Result<TokenResponse> {
        self.record("exchange")?;
        let (pending, wrong_nonce, lifetime, reported_expires_in) = {
            let mut state = self.state();
            let pending = state
                .codes
                .remove(&request.code)
                .ok_or_else(|| rejected(400, "invalid_grant"))?;
            (
                pending,
                state.wrong_nonce,
                state.token_lifetime,
                state.reported_expires_in,
            )
        };

        let verifier: KeyVerifier = serde_json::from_slice(&self.decrypt(&request.key_verifier)?)
            .map_err(|_| rejected(400, "invalid_request"))?;
        if code_challenge(&verifier.code_verifier) != pending.code_challenge {
            return Err(rejected_with_code(400, "invalid_grant", "3000"));
        }
        if request.redirect_uri != pending.redirect_uri {
            return Err(rejected_with_code(400, "invalid_grant", "3001"));
        }
        let key = base64url_decode(&verifier.token_key)
            .ok()
            .and_then(|bytes| AesKey::from_slice(&bytes).ok())
            .ok_or_else(|| rejected(400, "invalid_request"))?;

        let now = Utc::now();
        let exp = (now + lifetime).timestamp();
        let (access_token, access_jwt) = self.issue_token(
            &json!({
                "iss": MOCK_IDP_URL,
                "sub": "X110498793",
                "iat": now.timestamp(),
                "exp": exp,
                "scope": pending.scope,
                "jti": random_value(),
            }),
            &key,
        )?;
        let nonce = if wrong_nonce {
            "not-the-nonce".to_string()
        } else {
            pending.nonce.clone()
        };
        let (id_token, _) = self.issue_token(
            &json!({
                "iss": MOCK_IDP_URL,
                "sub": "X110498793",
                "iat": now.timestamp(),
                "exp": exp,
                "nonce": nonce,
                "given_name": "Juna",
                "family_name": "Fuchs",
                "idNummer": "X110498793",
                "organizationName": "Mock Krankenkasse",
                "professionOID": "1.2.276.0.76.4.49",
            }),
            &key,
        )?;
        self.state().access_tokens.insert(access_jwt, pending.scope);

        Ok(TokenResponse {
            access_token,
            id_token,
            expires_in: reported_expires_in.unwrap_or_else(|| lifetime.num_seconds()),
            token_type: "Bearer".to_string(),
        })
    }

    async fn register_device(
        &self,
        _endpoint: &Url,
        registration_data: &Jwe,
        access_token: &Jwe,
    ) -> Result<PairingEntry> {
        self.record("register_device")?;
        let scope = self.bearer_scope(access_token)?;
        if !scope.split(' ').any(|s| s == "pairing") {
            return Err(rejected_with_code(403, "access_denied", "pairingAuthorizationFailed"));
        }

        let registration: RegistrationData =
            serde_json::from_slice(&self.decrypt(registration_data)?)
                .map_err(|_| rejected(400, "invalid_request"))?;
        self.verify_with_x5c(&registration.signed_pairing_data)?;

        let entry = PairingEntry {
            name: registration.device_information.name,
            creation_time: Utc::now().timestamp(),
            signed_pairing_data: registration.signed_pairing_data,
            pairing_entry_version: Some("1.0".to_string()),
        };
        self.state().devices.push(entry.clone());
        Ok(entry)
    }

    async fn unregister_device(
        &self,
        _endpoint: &Url,
        key_identifier: &str,
        access_token: &Jwe,
    ) -> Result<()> {
        self.record("unregister_device")?;
        self.bearer_scope(access_token)?;
        let mut state = self.state();
        let before = state.devices.len();
        state.devices.retain(|entry| {
            entry
                .pairing_data()
                .map_or(true, |data| data.key_identifier != key_identifier)
        });
        if state.devices.len() == before {
            return Err(rejected(404, "not_found"));
        }
        Ok(())
    }

    async fn list_devices(&self, _endpoint: &Url, access_token: &Jwe) -> Result<PairingEntries> {
        self.record("list_devices")?;
        self.bearer_scope(access_token)?;
        Ok(PairingEntries {
            pairing_entries: self.state().devices.clone(),
        })
    }

    async fn load_directory_kk_apps(&self, _endpoint: &Url) -> Result<Jwt> {
        self.record("load_directory_kk_apps")?;
        let signer = &self.inner.discovery_signer;
        let header = JwtHeader::new(signer.public_key().curve.jws_algorithm());
        signer.sign_sync(
            &header,
            &KkAppDirectory {
                kk_app_list: Self::kk_apps(),
            },
        )
    }

    async fn start_ext_auth(&self, endpoint: &Url, request: &ExtAuthRequest) -> Result<Url> {
        self.record("start_ext_auth")?;
        if !Self::kk_apps()
            .iter()
            .any(|entry| entry.kk_app_id == request.kk_app_id)
        {
            return Err(rejected_with_code(400, "invalid_request", "2011"));
        }
        let pending = PendingAuthorization {
            state: request.state.clone(),
            nonce: request.nonce.clone(),
            code_challenge: request.code_challenge.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scope: request.scope.clone(),
        };

        let federated = endpoint.as_str() == endpoint_url("fedauth").as_str();
        let (lookup_state, mut location) = if federated {
            (
                request.state.clone(),
                Url::parse("https://gid.example.com/authorize").expect("static URL"),
            )
        } else {
            (
                format!("idp-{}", random_value()),
                Url::parse("https://kk.example.com/app/auth").expect("static URL"),
            )
        };
        location
            .query_pairs_mut()
            .append_pair("client_id", &request.client_id)
            .append_pair("state", &lookup_state)
            .append_pair("kk_app_id", &request.kk_app_id);

        self.state().ext_auth.insert(lookup_state, pending);
        Ok(location)
    }

    async fn ext_auth_verify(&self, _endpoint: &Url, verify: &ExtAuthVerify) -> Result<ExchangeToken> {
        self.record("ext_auth_verify")?;
        let pending = {
            let mut state = self.state();
            match state.kk_codes.remove(&verify.code) {
                Some(expected) if expected == verify.state => {}
                _ => return Err(rejected_with_code(400, "invalid_request", "2012")),
            }
            state
                .ext_auth
                .remove(&verify.state)
                .ok_or_else(|| rejected_with_code(400, "invalid_request", "2013"))?
        };
        Ok(self.authorize(pending, true))
    }
}

/// Device metadata every mock environment reports.
#[must_use]
pub fn mock_device_information() -> DeviceInformation {
    DeviceInformation {
        name: "Juna's Phone".to_string(),
        device_type: DeviceType {
            product: "MockPhone".to_string(),
            model: "MP-1".to_string(),
            os: "MockOS".to_string(),
            os_version: "17.0".to_string(),
            manufacturer: "Mock Inc.".to_string(),
        },
    }
}

fn endpoint(path: &str) -> String {
    format!("{MOCK_IDP_URL}/{path}")
}

fn endpoint_url(path: &str) -> Url {
    Url::parse(&endpoint(path)).expect("static URL")
}

fn random_value() -> String {
    CryptoBox::new().generate_state()
}

fn rejected(status: u16, error: &str) -> IdpError {
    IdpError::ServerError(ServerErrorResponse {
        status,
        error: error.to_string(),
        code: None,
        description: None,
    })
}

fn rejected_with_code(status: u16, error: &str, code: &str) -> IdpError {
    IdpError::ServerError(ServerErrorResponse {
        status,
        error: error.to_string(),
        code: Some(code.to_string()),
        description: None,
    })
}
