//! Credential types and the credential store.
//!
//! The store wraps two files: the externally provisioned client secret
//! (Google "installed app" JSON, read-only) and the token file this program
//! writes. Refresh happens in place through the `oauth2` crate; the
//! interactive flow lives in [`super::flow`].

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, RefreshToken, TokenResponse, TokenUrl};
use serde::{Deserialize, Serialize};

use super::flow;

pub(crate) const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub(crate) const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// The one scope this program needs: read messages and change their labels.
pub(crate) const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Refresh the access token this long before it actually expires.
const REFRESH_THRESHOLD_MINUTES: i64 = 5;

/// Errors that can occur during credential operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The client secret file is missing.
    #[error("client secret file not found at {0}")]
    MissingClientSecret(PathBuf),

    /// No credential has been obtained yet.
    #[error("no credential available; authorization has not run")]
    NotObtained,

    /// Exchanging the refresh token for a new access token failed.
    #[error("token refresh failed: {0}")]
    Refresh(String),

    /// The interactive authorization flow failed or was refused.
    #[error("interactive authorization failed: {0}")]
    Authorization(String),

    /// The authorization callback was not received in time.
    #[error("authorization callback timed out after {0} seconds")]
    Timeout(u64),

    /// Filesystem error reading or writing credential files.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A credential or client secret file could not be (de)serialized.
    #[error("credential serialization: {0}")]
    Serde(#[from] serde_json::Error),

    /// A fixed OAuth endpoint URL failed to parse.
    #[error("invalid endpoint url: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// A reusable OAuth credential, persisted as JSON in the token file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Short-lived bearer token for API requests.
    pub access_token: String,
    /// Long-lived token used to mint new access tokens.
    pub refresh_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// OAuth client ID this credential was issued to.
    pub client_id: String,
    /// OAuth client secret paired with the client ID.
    pub client_secret: String,
    /// Scopes granted by the user.
    pub scopes: Vec<String>,
}

impl Credential {
    /// Returns whether the access token expires within the given margin.
    pub fn is_expiring(&self, within: Duration) -> bool {
        Utc::now() + within >= self.expires_at
    }
}

/// Google "installed application" client secret file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecretFile {
    /// The installed-app section; the only one this program uses.
    pub installed: InstalledApp,
}

/// Client identifiers from the client secret file.
#[derive(Debug, Clone, Deserialize)]
pub struct InstalledApp {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

impl ClientSecretFile {
    /// Loads and parses the client secret file.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AuthError::MissingClientSecret(path.to_path_buf())
            } else {
                AuthError::Io(e)
            }
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Builds the Google OAuth client for refresh and code exchange.
pub(crate) fn oauth_client(
    client_id: &str,
    client_secret: &str,
) -> Result<BasicClient, AuthError> {
    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(ClientSecret::new(client_secret.to_string())),
        AuthUrl::new(GOOGLE_AUTH_URL.to_string())?,
        Some(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?),
    ))
}

/// Loads, refreshes, and persists the OAuth credential.
///
/// The store is the single owner of the token file. [`obtain`](Self::obtain)
/// runs once at startup and may open a browser; [`access_token`](Self::access_token)
/// is called before every API request and only ever refreshes.
pub struct CredentialStore {
    token_path: PathBuf,
    secret_path: PathBuf,
    callback_timeout: StdDuration,
    credential: Option<Credential>,
}

impl CredentialStore {
    /// Creates a store over the given token and client secret files.
    pub fn new(
        token_path: impl Into<PathBuf>,
        secret_path: impl Into<PathBuf>,
        callback_timeout: StdDuration,
    ) -> Self {
        Self {
            token_path: token_path.into(),
            secret_path: secret_path.into(),
            callback_timeout,
            credential: None,
        }
    }

    /// Returns the currently cached credential, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Obtains a usable credential.
    ///
    /// Tries, in order: the persisted credential as-is, an in-place refresh
    /// of the persisted credential, and finally the interactive authorization
    /// flow. The credential is re-persisted after a refresh or authorization.
    ///
    /// # Errors
    ///
    /// Fails only when the interactive flow cannot complete; callers treat
    /// this as fatal.
    pub async fn obtain(&mut self) -> Result<Credential, AuthError> {
        self.obtain_with(|app, timeout| async move { flow::authorize(&app, timeout).await })
            .await
    }

    /// [`obtain`](Self::obtain) with the interactive step injected, so tests
    /// can observe the decision logic without opening a browser.
    async fn obtain_with<F, Fut>(&mut self, authorize: F) -> Result<Credential, AuthError>
    where
        F: FnOnce(InstalledApp, StdDuration) -> Fut,
        Fut: std::future::Future<Output = Result<Credential, AuthError>>,
    {
        if let Some(cred) = self.load_persisted() {
            self.credential = Some(cred);

            let expiring = match &self.credential {
                Some(c) => c.is_expiring(refresh_threshold()),
                None => true,
            };
            if !expiring {
                tracing::info!("loaded persisted credential");
                if let Some(c) = &self.credential {
                    return Ok(c.clone());
                }
            }

            match self.refresh().await {
                Ok(()) => {
                    if let Some(c) = &self.credential {
                        return Ok(c.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stored credential could not be refreshed");
                    self.credential = None;
                }
            }
        }

        // No usable credential: run the interactive flow.
        let secrets = ClientSecretFile::load(&self.secret_path)?;
        let cred = authorize(secrets.installed, self.callback_timeout).await?;
        self.credential = Some(cred.clone());
        self.persist()?;
        tracing::info!("interactive authorization complete, credential persisted");
        Ok(cred)
    }

    /// Returns a valid access token for API requests.
    ///
    /// Refreshes (and re-persists) the credential when it is within the
    /// refresh threshold. Never runs the interactive flow.
    pub async fn access_token(&mut self) -> Result<String, AuthError> {
        let expiring = match &self.credential {
            Some(c) => c.is_expiring(refresh_threshold()),
            None => return Err(AuthError::NotObtained),
        };

        if expiring {
            self.refresh().await?;
        }

        match &self.credential {
            Some(c) => Ok(c.access_token.clone()),
            None => Err(AuthError::NotObtained),
        }
    }

    /// Exchanges the refresh token for a new access token and persists.
    async fn refresh(&mut self) -> Result<(), AuthError> {
        let cred = match &self.credential {
            Some(c) => c.clone(),
            None => return Err(AuthError::NotObtained),
        };

        tracing::info!("refreshing access token");
        let client = oauth_client(&cred.client_id, &cred.client_secret)?;
        let response = client
            .exchange_refresh_token(&RefreshToken::new(cred.refresh_token.clone()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        let expires_in = response
            .expires_in()
            .unwrap_or(StdDuration::from_secs(3600));

        // Google typically omits the refresh token on refresh responses;
        // keep the existing one in that case.
        let refresh_token = response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .unwrap_or(cred.refresh_token);

        self.credential = Some(Credential {
            access_token: response.access_token().secret().to_string(),
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in.as_secs() as i64),
            client_id: cred.client_id,
            client_secret: cred.client_secret,
            scopes: cred.scopes,
        });
        self.persist()?;

        tracing::debug!("access token refreshed and persisted");
        Ok(())
    }

    /// Loads the persisted credential, treating a missing or unreadable file
    /// as absent.
    fn load_persisted(&self) -> Option<Credential> {
        let raw = match std::fs::read_to_string(&self.token_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.token_path.display(), error = %e, "could not read token file");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cred) => Some(cred),
            Err(e) => {
                tracing::warn!(path = %self.token_path.display(), error = %e, "invalid token file, ignoring");
                None
            }
        }
    }

    /// Overwrites the token file with the cached credential.
    fn persist(&self) -> Result<(), AuthError> {
        let cred = match &self.credential {
            Some(c) => c,
            None => return Err(AuthError::NotObtained),
        };

        if let Some(parent) = self.token_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(cred)?;
        std::fs::write(&self.token_path, json)?;
        Ok(())
    }
}

/// The refresh margin as a chrono duration.
fn refresh_threshold() -> Duration {
    Duration::minutes(REFRESH_THRESHOLD_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_credential(expires_at: DateTime<Utc>) -> Credential {
        Credential {
            access_token: "ya29.access".to_string(),
            refresh_token: "1//refresh".to_string(),
            expires_at,
            client_id: "client-id.apps.googleusercontent.com".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec![GMAIL_MODIFY_SCOPE.to_string()],
        }
    }

    #[test]
    fn credential_expiry_margin() {
        let fresh = sample_credential(Utc::now() + Duration::hours(1));
        assert!(!fresh.is_expiring(refresh_threshold()));

        let expiring = sample_credential(Utc::now() + Duration::minutes(2));
        assert!(expiring.is_expiring(refresh_threshold()));

        let expired = sample_credential(Utc::now() - Duration::hours(1));
        assert!(expired.is_expiring(refresh_threshold()));
    }

    #[test]
    fn credential_roundtrip() {
        let cred = sample_credential(Utc::now() + Duration::hours(1));
        let json = serde_json::to_string(&cred).unwrap();
        let back: Credential = serde_json::from_str(&json).unwrap();

        assert_eq!(back.access_token, cred.access_token);
        assert_eq!(back.refresh_token, cred.refresh_token);
        assert_eq!(back.scopes, cred.scopes);
    }

    #[test]
    fn client_secret_file_parses_installed_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret.json");
        std::fs::write(
            &path,
            r#"{"installed": {
                "client_id": "abc.apps.googleusercontent.com",
                "client_secret": "s3cret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "redirect_uris": ["http://localhost"]
            }}"#,
        )
        .unwrap();

        let file = ClientSecretFile::load(&path).unwrap();
        assert_eq!(file.installed.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(file.installed.client_secret, "s3cret");
    }

    #[test]
    fn missing_client_secret_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = ClientSecretFile::load(&missing).unwrap_err();
        assert!(matches!(err, AuthError::MissingClientSecret(_)));
    }

    #[test]
    fn store_load_persist_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");

        let mut store = CredentialStore::new(
            &token_path,
            dir.path().join("client_secret.json"),
            StdDuration::from_secs(1),
        );
        store.credential = Some(sample_credential(Utc::now() + Duration::hours(1)));
        store.persist().unwrap();
        assert!(token_path.exists());

        let store2 = CredentialStore::new(
            &token_path,
            dir.path().join("client_secret.json"),
            StdDuration::from_secs(1),
        );
        let loaded = store2.load_persisted().unwrap();
        assert_eq!(loaded.access_token, "ya29.access");
    }

    #[test]
    fn corrupt_token_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        std::fs::write(&token_path, "not json").unwrap();

        let store = CredentialStore::new(
            &token_path,
            dir.path().join("client_secret.json"),
            StdDuration::from_secs(1),
        );
        assert!(store.load_persisted().is_none());
    }

    #[tokio::test]
    async fn obtain_runs_interactive_flow_once_and_persists() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");
        let secret_path = dir.path().join("client_secret.json");
        std::fs::write(
            &secret_path,
            r#"{"installed": {"client_id": "abc.apps.googleusercontent.com",
                "client_secret": "s3cret"}}"#,
        )
        .unwrap();

        let mut store = CredentialStore::new(&token_path, &secret_path, StdDuration::from_secs(1));

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        let cred = store
            .obtain_with(move |app, _timeout| {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(app.client_id, "abc.apps.googleusercontent.com");
                async move { Ok(sample_credential(Utc::now() + Duration::hours(1))) }
            })
            .await
            .unwrap();

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert!(token_path.exists());
        let persisted = store.load_persisted().unwrap();
        assert_eq!(persisted.access_token, cred.access_token);
        assert_eq!(persisted.refresh_token, cred.refresh_token);
    }

    #[tokio::test]
    async fn obtain_uses_fresh_persisted_credential_without_flow() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token.json");

        let mut seed = CredentialStore::new(
            &token_path,
            dir.path().join("client_secret.json"),
            StdDuration::from_secs(1),
        );
        seed.credential = Some(sample_credential(Utc::now() + Duration::hours(1)));
        seed.persist().unwrap();

        let mut store = CredentialStore::new(
            &token_path,
            dir.path().join("client_secret.json"),
            StdDuration::from_secs(1),
        );

        let flow_ran = Arc::new(AtomicBool::new(false));
        let flag = flow_ran.clone();
        let cred = store
            .obtain_with(move |_app, _timeout| {
                flag.store(true, Ordering::SeqCst);
                async move { Err(AuthError::Authorization("should not run".to_string())) }
            })
            .await
            .unwrap();

        assert!(!flow_ran.load(Ordering::SeqCst));
        assert_eq!(cred.access_token, "ya29.access");
    }

    #[tokio::test]
    async fn obtain_without_secret_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::new(
            dir.path().join("token.json"),
            dir.path().join("missing_secret.json"),
            StdDuration::from_secs(1),
        );

        let err = store
            .obtain_with(|_app, _timeout| async move {
                Ok(sample_credential(Utc::now() + Duration::hours(1)))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingClientSecret(_)));
    }

    #[tokio::test]
    async fn access_token_requires_obtain() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::new(
            dir.path().join("token.json"),
            dir.path().join("client_secret.json"),
            StdDuration::from_secs(1),
        );
        let err = store.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::NotObtained));
    }

    #[tokio::test]
    async fn access_token_returns_cached_when_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::new(
            dir.path().join("token.json"),
            dir.path().join("client_secret.json"),
            StdDuration::from_secs(1),
        );
        store.credential = Some(sample_credential(Utc::now() + Duration::hours(1)));

        let token = store.access_token().await.unwrap();
        assert_eq!(token, "ya29.access");
    }
}
