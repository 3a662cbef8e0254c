use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier,
    RedirectUrl, Scope, TokenUrl,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use url::Url;
use warp::Filter;

use crate::credential::TokenGrant;
use crate::error::AuthError;
use crate::google::TokenEndpointClient;

const GOOGLE_ISSUER: &str = "https://accounts.google.com";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8085/callback";

// Identity plus read/write access to calendar events
const DEFAULT_SCOPES: [&str; 4] = [
    "openid",
    "profile",
    "email",
    "https://www.googleapis.com/auth/calendar.events",
];

/// Provider error code reported when the user declines consent.
const ACCESS_DENIED: &str = "access_denied";

/// Everything the interactive flow needs to reach the identity provider.
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    pub issuer: String,

    /// Client ID from OAuth provider
    pub client_id: String,

    /// Only confidential clients have a secret
    pub client_secret: Option<String>,

    /// Loopback redirect the callback server listens on
    pub redirect_uri: String,

    pub scopes: Vec<String>,

    pub authorization_endpoint: String,

    pub token_endpoint: String,
}

impl AuthorizationConfig {
    /// Google endpoints with the default calendar scopes.
    pub fn google(client_id: impl Into<String>) -> Self {
        Self {
            issuer: GOOGLE_ISSUER.to_string(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            authorization_endpoint: GOOGLE_AUTH_URL.to_string(),
            token_endpoint: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    /// Token endpoint client for this registration.
    pub fn token_client(&self) -> TokenEndpointClient {
        TokenEndpointClient::new(self.token_endpoint.clone(), self.client_id.clone())
            .with_client_secret(self.client_secret.clone())
    }
}

/// User-present authorization-code flow yielding a fresh set of tokens.
pub trait InteractiveAuthorizer: Send + Sync {
    /// Run the flow to completion.
    ///
    /// # Errors
    /// [`AuthError::UserCancelled`] when the user abandons consent,
    /// [`AuthError::AuthorizationFailed`] for every other failure.
    async fn authorize(&self, config: &AuthorizationConfig) -> Result<TokenGrant, AuthError>;
}

/// An authorization URL together with the secrets needed to finish the flow.
pub struct PendingAuthorization {
    pub url: String,
    pub csrf_state: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

/// Build the consent URL with CSRF state and a PKCE S256 challenge.
pub fn build_authorization_request(
    config: &AuthorizationConfig,
) -> Result<PendingAuthorization, AuthError> {
    let invalid = |what: &str, e: url::ParseError| {
        AuthError::AuthorizationFailed(format!("invalid {}: {}", what, e))
    };

    let client = BasicClient::new(
        ClientId::new(config.client_id.clone()),
        config.client_secret.clone().map(ClientSecret::new),
        AuthUrl::new(config.authorization_endpoint.clone())
            .map_err(|e| invalid("authorization endpoint", e))?,
        Some(TokenUrl::new(config.token_endpoint.clone()).map_err(|e| invalid("token endpoint", e))?),
    )
    .set_redirect_uri(
        RedirectUrl::new(config.redirect_uri.clone()).map_err(|e| invalid("redirect URI", e))?,
    );

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let mut auth_request = client.authorize_url(CsrfToken::new_random);
    for scope in &config.scopes {
        auth_request = auth_request.add_scope(Scope::new(scope.clone()));
    }

    // Offline access so the provider issues a refresh token
    let (auth_url, csrf_state) = auth_request
        .set_pkce_challenge(pkce_challenge)
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();

    Ok(PendingAuthorization {
        url: auth_url.to_string(),
        csrf_state,
        pkce_verifier,
    })
}

/// Turn the redirect query into an authorization code.
pub fn interpret_callback(
    params: &HashMap<String, String>,
    expected_state: &str,
) -> Result<String, AuthError> {
    if let Some(error) = params.get("error") {
        if error == ACCESS_DENIED {
            return Err(AuthError::UserCancelled);
        }
        let detail = params
            .get("error_description")
            .map(|d| format!("{}: {}", error, d))
            .unwrap_or_else(|| error.clone());
        return Err(AuthError::AuthorizationFailed(detail));
    }

    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Err(AuthError::AuthorizationFailed("CSRF state mismatch".to_string()));
    }

    params
        .get("code")
        .filter(|c| !c.is_empty())
        .cloned()
        .ok_or_else(|| AuthError::AuthorizationFailed("callback carried no code".to_string()))
}

/// Socket address and path the loopback callback server must serve.
fn callback_target(redirect_uri: &str) -> Result<(SocketAddr, String), AuthError> {
    let url = Url::parse(redirect_uri)
        .map_err(|e| AuthError::AuthorizationFailed(format!("invalid redirect URI: {}", e)))?;

    let ip = match url.host_str() {
        None => {
            return Err(AuthError::AuthorizationFailed(
                "redirect URI has no host for a loopback listener".to_string(),
            ))
        }
        Some("localhost") => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| {
                AuthError::AuthorizationFailed(format!(
                    "redirect host {} is not a loopback address",
                    host
                ))
            })?,
    };
    if !ip.is_loopback() {
        return Err(AuthError::AuthorizationFailed(format!(
            "redirect host {} is not a loopback address",
            ip
        )));
    }

    let port = url.port_or_known_default().unwrap_or(80);
    Ok((SocketAddr::new(ip, port), url.path().to_string()))
}

type BrowserOpener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;
type CallbackSender = Arc<Mutex<Option<oneshot::Sender<HashMap<String, String>>>>>;

/// Browser-mediated flow with a local loopback callback server.
pub struct BrowserAuthorizer {
    callback_timeout: Duration,
    opener: BrowserOpener,
}

impl BrowserAuthorizer {
    pub fn new(callback_timeout: Duration) -> Self {
        Self {
            callback_timeout,
            opener: Arc::new(|url: &str| webbrowser::open(url)),
        }
    }

    /// Replace how the consent URL is presented to the user.
    pub fn with_opener(
        mut self,
        opener: impl Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    async fn wait_for_callback(
        &self,
        redirect_uri: &str,
        auth_url: &str,
    ) -> Result<HashMap<String, String>, AuthError> {
        let (addr, expected_path) = callback_target(redirect_uri)?;

        let (tx, rx) = oneshot::channel();
        let tx: CallbackSender = Arc::new(Mutex::new(Some(tx)));

        let routes = warp::get()
            .and(warp::path::full())
            .and(warp::query::<HashMap<String, String>>())
            .and(warp::any().map(move || tx.clone()))
            .and(warp::any().map(move || expected_path.clone()))
            .and_then(
                |full: warp::path::FullPath,
                 params: HashMap<String, String>,
                 tx: CallbackSender,
                 expected_path: String| async move {
                    if full.as_str() != expected_path {
                        return Err(warp::reject::not_found());
                    }

                    let denied = params.contains_key("error");
                    if let Some(sender) = tx.lock().await.take() {
                        let _ = sender.send(params);
                    }

                    let body = if denied {
                        "<html><body><h1>Authorization not completed</h1><p>You can close this window.</p></body></html>"
                    } else {
                        "<html><body><h1>Authorization successful!</h1><p>You can close this window and return to calsync.</p></body></html>"
                    };
                    Ok::<_, warp::Rejection>(warp::reply::html(body))
                },
            );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (bound, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.await;
            })
            .map_err(|e| {
                AuthError::AuthorizationFailed(format!("cannot listen on {}: {}", addr, e))
            })?;
        tokio::spawn(server);
        tracing::debug!("OAuth callback server listening on {}", bound);

        tracing::info!("Opening browser for authorization...");
        if let Err(e) = (self.opener)(auth_url) {
            tracing::warn!("Failed to open browser: {}", e);
            tracing::warn!("Open this URL in your browser to continue: {}", auth_url);
        }

        let outcome = tokio::time::timeout(self.callback_timeout, rx).await;
        let _ = shutdown_tx.send(());

        match outcome {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(AuthError::AuthorizationFailed(
                "callback server stopped before redirect".to_string(),
            )),
            Err(_) => Err(AuthError::AuthorizationFailed(
                "timed out waiting for authorization callback".to_string(),
            )),
        }
    }
}

impl InteractiveAuthorizer for BrowserAuthorizer {
    #[tracing::instrument(skip(self, config), fields(issuer = %config.issuer), level = "info")]
    async fn authorize(&self, config: &AuthorizationConfig) -> Result<TokenGrant, AuthError> {
        let pending = build_authorization_request(config)?;

        let params = self
            .wait_for_callback(&config.redirect_uri, &pending.url)
            .await?;
        let code = interpret_callback(&params, pending.csrf_state.secret())?;

        let grant = config
            .token_client()
            .exchange_code(&code, pending.pkce_verifier.secret(), &config.redirect_uri)
            .await?;

        tracing::info!("Authorization flow completed for {}", config.issuer);
        Ok(grant)
    }
}
