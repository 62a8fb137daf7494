//! Bearer credential handling shared by every REST call of a session.
//!
//! Service implementations read the current credential with
//! [`AuthPipeline::bearer`] and are driven through [`AuthPipeline::execute`],
//! which refreshes the credential once after an authorization failure and
//! retries the request once. A second failure expires the session.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kanban_sync_core::{SyncError, SyncResult};
use tracing::{debug, info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Obtains a fresh bearer credential.
    async fn refresh(&self) -> SyncResult<String>;
}

pub struct AuthPipeline {
    refresher: Arc<dyn CredentialRefresher>,
    token: RwLock<Option<String>>,
    expired: AtomicBool,
}

impl AuthPipeline {
    pub fn new(refresher: Arc<dyn CredentialRefresher>, token: Option<String>) -> Self {
        Self {
            refresher,
            token: RwLock::new(token),
            expired: AtomicBool::new(false),
        }
    }

    pub fn bearer(&self) -> Option<String> {
        match self.token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// `Authorization` header value for the current credential.
    pub fn authorization_header(&self) -> Option<String> {
        self.bearer().map(|token| format!("Bearer {}", token))
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Runs `request`, refreshing and retrying once on `Unauthorized`.
    ///
    /// Fails with `SessionExpired` without calling `request` once the session
    /// has expired.
    pub async fn execute<T, F, Fut>(&self, mut request: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        if self.is_expired() {
            return Err(SyncError::SessionExpired);
        }

        match request().await {
            Err(SyncError::Unauthorized) => {}
            other => return other,
        }

        debug!("Request unauthorized, refreshing credential");
        match self.refresher.refresh().await {
            Ok(token) => self.set_token(Some(token)),
            Err(e) => {
                warn!(error = %e, "Credential refresh failed");
                return Err(self.expire());
            }
        }

        match request().await {
            Err(SyncError::Unauthorized) => {
                warn!("Request unauthorized after credential refresh");
                Err(self.expire())
            }
            other => other,
        }
    }

    /// Replaces the credential after an explicit sign-in.
    pub fn sign_in(&self, token: String) {
        self.set_token(Some(token));
        self.expired.store(false, Ordering::SeqCst);
        info!("Signed in");
    }

    fn set_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn expire(&self) -> SyncError {
        if !self.expired.swap(true, Ordering::SeqCst) {
            info!("Session expired");
        }
        self.set_token(None);
        SyncError::SessionExpired
    }
}

impl std::fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("has_token", &self.bearer().is_some())
            .field("expired", &self.is_expired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pipeline(refresher: MockCredentialRefresher) -> AuthPipeline {
        AuthPipeline::new(Arc::new(refresher), Some("stale".to_string()))
    }

    #[tokio::test]
    async fn test_success_does_not_refresh() {
        let mut refresher = MockCredentialRefresher::new();
        refresher.expect_refresh().never();
        let auth = pipeline(refresher);

        let result = auth.execute(|| async { Ok::<_, SyncError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_retries() {
        let mut refresher = MockCredentialRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|| Ok("fresh".to_string()));
        let auth = pipeline(refresher);
        let calls = AtomicUsize::new(0);

        let result = auth
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(SyncError::Unauthorized)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(auth.bearer().as_deref(), Some("fresh"));
        assert_eq!(auth.authorization_header().as_deref(), Some("Bearer fresh"));
    }

    #[tokio::test]
    async fn test_second_failure_expires_session() {
        let mut refresher = MockCredentialRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|| Ok("fresh".to_string()));
        let auth = pipeline(refresher);
        let calls = AtomicUsize::new(0);

        let result: SyncResult<()> = auth
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Unauthorized) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::SessionExpired)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(auth.is_expired());
        assert!(auth.bearer().is_none());

        let after: SyncResult<()> = auth.execute(|| async { Ok(()) }).await;
        assert!(matches!(after, Err(SyncError::SessionExpired)));
    }

    #[tokio::test]
    async fn test_failed_refresh_expires_without_retry() {
        let mut refresher = MockCredentialRefresher::new();
        refresher
            .expect_refresh()
            .times(1)
            .returning(|| Err(SyncError::Network("down".to_string())));
        let auth = pipeline(refresher);
        let calls = AtomicUsize::new(0);

        let result: SyncResult<()> = auth
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Unauthorized) }
            })
            .await;

        assert!(matches!(result, Err(SyncError::SessionExpired)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let mut refresher = MockCredentialRefresher::new();
        refresher.expect_refresh().never();
        let auth = pipeline(refresher);

        let result: SyncResult<()> = auth
            .execute(|| async { Err(SyncError::Conflict("stale".to_string())) })
            .await;
        assert!(matches!(result, Err(SyncError::Conflict(_))));
        assert!(!auth.is_expired());
    }

    #[tokio::test]
    async fn test_sign_in_clears_expiry() {
        let mut refresher = MockCredentialRefresher::new();
        refresher
            .expect_refresh()
            .returning(|| Err(SyncError::Unauthorized));
        let auth = pipeline(refresher);
        let _: SyncResult<()> = auth.execute(|| async { Err(SyncError::Unauthorized) }).await;
        assert!(auth.is_expired());

        auth.sign_in("new".to_string());
        assert!(!auth.is_expired());
        assert_eq!(auth.bearer().as_deref(), Some("new"));
    }
}
