//! Interactive OAuth 2.0 authorization.
//!
//! Implements the authorization-code flow with PKCE for an installed
//! application: start a local callback listener, open the consent page in
//! the user's browser, wait for the redirect, validate the CSRF state, and
//! exchange the authorization code for tokens. Runs at most once per
//! process, from [`CredentialStore::obtain`](super::CredentialStore::obtain).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use oauth2::{
    AuthorizationCode, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope, TokenResponse,
};
use tiny_http::{Header, Response, Server};
use tokio::sync::oneshot;
use url::Url;

use super::credential::{oauth_client, AuthError, Credential, InstalledApp, GMAIL_MODIFY_SCOPE};

/// Ports tried for the local callback listener.
const PORT_RANGE: std::ops::Range<u16> = 8080..8090;

const SUCCESS_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<title>chime</title></head><body><h1>Authorization complete</h1>\
<p>chime is connected to your mailbox. You can close this page.</p></body></html>";

const DENIED_HTML: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<title>chime</title></head><body><h1>Authorization failed</h1>\
<p>chime was not granted access. Close this page and try again.</p></body></html>";

/// Outcome delivered by the callback listener: authorization code and CSRF
/// state on success, a denial reason otherwise.
type CallbackOutcome = std::result::Result<(String, String), String>;

/// Runs the interactive authorization flow and returns a fresh credential.
///
/// # Errors
///
/// Fails when no callback port can be bound, the user denies consent, the
/// callback times out, the CSRF state does not match, or the code exchange
/// is rejected. All of these are fatal to the caller.
pub(super) async fn authorize(
    app: &InstalledApp,
    timeout: StdDuration,
) -> Result<Credential, AuthError> {
    let (server, port) = bind_listener(PORT_RANGE)?;
    let redirect_uri = format!("http://localhost:{}", port);

    let client = oauth_client(&app.client_id, &app.client_secret)?
        .set_redirect_uri(RedirectUrl::new(redirect_uri)?);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(GMAIL_MODIFY_SCOPE.to_string()))
        .set_pkce_challenge(pkce_challenge)
        // Google only issues a refresh token for offline access with
        // explicit consent.
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();

    let server = Arc::new(server);
    let listener = Arc::clone(&server);
    let (tx, rx) = oneshot::channel::<CallbackOutcome>();
    std::thread::spawn(move || serve_callback(&listener, tx));
    tracing::info!(%port, "callback listener started");

    println!("Open this page to authorize mailbox access:\n  {}", auth_url);
    if let Err(e) = webbrowser::open(auth_url.as_str()) {
        tracing::warn!(error = %e, "could not open browser, use the printed URL");
    }

    let outcome = match tokio::time::timeout(timeout, rx).await {
        Ok(received) => received
            .map_err(|_| AuthError::Authorization("callback listener closed".to_string()))?,
        Err(_) => {
            // Release the listener thread before giving up.
            server.unblock();
            return Err(AuthError::Timeout(timeout.as_secs()));
        }
    };

    let (code, state) = outcome.map_err(AuthError::Authorization)?;

    if state != *csrf_state.secret() {
        return Err(AuthError::Authorization("CSRF state mismatch".to_string()));
    }

    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| AuthError::Authorization(format!("code exchange failed: {}", e)))?;

    let refresh_token = token
        .refresh_token()
        .ok_or_else(|| AuthError::Authorization("no refresh token granted".to_string()))?
        .secret()
        .to_string();

    let expires_in = token.expires_in().unwrap_or(StdDuration::from_secs(3600));

    Ok(Credential {
        access_token: token.access_token().secret().to_string(),
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(expires_in.as_secs() as i64),
        client_id: app.client_id.clone(),
        client_secret: app.client_secret.clone(),
        scopes: vec![GMAIL_MODIFY_SCOPE.to_string()],
    })
}

/// Binds the callback listener to the first free port in the given range.
///
/// Returns the port actually bound, which matters when the range asks for
/// port 0 and the OS assigns one.
fn bind_listener(ports: std::ops::Range<u16>) -> Result<(Server, u16), AuthError> {
    let (start, end) = (ports.start, ports.end);
    for port in ports {
        match Server::http(("127.0.0.1", port)) {
            Ok(server) => {
                let bound = server
                    .server_addr()
                    .to_ip()
                    .map(|addr| addr.port())
                    .unwrap_or(port);
                return Ok((server, bound));
            }
            Err(e) => tracing::debug!(%port, error = %e, "callback port unavailable"),
        }
    }
    Err(AuthError::Authorization(format!(
        "no free callback port in {}..{}",
        start, end
    )))
}

/// Serves the OAuth redirect on a dedicated thread.
///
/// Ignores stray requests (favicons and the like) until one carries either
/// an `error` or a `code`/`state` pair, answers it with a small HTML page,
/// and reports the outcome through the channel.
fn serve_callback(server: &Server, tx: oneshot::Sender<CallbackOutcome>) {
    let mut tx = Some(tx);

    for request in server.incoming_requests() {
        let url = match Url::parse(&format!("http://localhost{}", request.url())) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable callback request, ignoring");
                continue;
            }
        };
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        if let Some(error) = params.get("error") {
            respond_html(request, DENIED_HTML);
            if let Some(tx) = tx.take() {
                let _ = tx.send(Err(format!("authorization denied: {}", error)));
            }
            return;
        }

        if let (Some(code), Some(state)) = (params.get("code"), params.get("state")) {
            respond_html(request, SUCCESS_HTML);
            if let Some(tx) = tx.take() {
                let _ = tx.send(Ok((code.clone(), state.clone())));
            }
            return;
        }

        // Not the redirect; likely a favicon probe.
        let _ = request.respond(Response::empty(404));
    }
}

fn respond_html(request: tiny_http::Request, body: &str) {
    let response = Response::from_string(body).with_header(
        Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
            .unwrap_or_else(|_| unreachable!("static header is valid")),
    );
    if let Err(e) = request.respond(response) {
        tracing::warn!(error = %e, "failed to answer callback request");
    }
}
