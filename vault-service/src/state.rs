use crate::error::AppError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use vault_core::{CancelToken, Vault};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    vault: RwLock<Option<Arc<Vault>>>,
    /// Token of the scan or export currently running, if any
    active: Mutex<Option<CancelToken>>,
}

impl AppState {
    pub fn new(vault: Option<Vault>) -> Self {
        Self {
            vault: RwLock::new(vault.map(Arc::new)),
            active: Mutex::new(None),
        }
    }

    pub async fn current(&self) -> Option<Arc<Vault>> {
        self.vault.read().await.clone()
    }

    pub async fn require(&self) -> Result<Arc<Vault>, AppError> {
        self.current().await.ok_or_else(AppError::no_vault)
    }

    /// Vault for `root`, opening (and initializing) it when it isn't the
    /// one currently held.
    pub async fn vault_for(&self, root: &str) -> Result<Arc<Vault>, AppError> {
        let requested: PathBuf = Path::new(root)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(root));
        if let Some(current) = self.current().await {
            if current.root() == requested {
                return Ok(current);
            }
        }

        let vault = tokio::task::spawn_blocking(move || Vault::open_or_init(&requested))
            .await
            .map_err(AppError::internal)??;
        let vault = Arc::new(vault);

        let mut slot = self.vault.write().await;
        match slot.as_ref() {
            Some(existing) if existing.root() == vault.root() => Ok(Arc::clone(existing)),
            _ => {
                tracing::info!(root = %vault.root().display(), "switched vault");
                *slot = Some(Arc::clone(&vault));
                Ok(vault)
            }
        }
    }

    /// Claim the single slot for a cancellable operation. A second scan or
    /// export is refused while one is registered, so `/cancel` always
    /// reaches the operation that is actually running.
    pub fn begin(self: &Arc<Self>, operation: &'static str) -> Result<ActiveOperation, AppError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            return Err(AppError::busy(operation));
        }
        let token = CancelToken::new();
        *active = Some(token.clone());
        Ok(ActiveOperation {
            state: Arc::clone(self),
            token,
        })
    }

    fn finish(&self, token: &CancelToken) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.as_ref() {
            if current.same_as(token) {
                *active = None;
            }
        }
    }

    /// Trip the running operation's token. Returns false when nothing runs.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match active.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Registration of a running scan or export; releases the slot on drop
pub struct ActiveOperation {
    state: SharedState,
    token: CancelToken,
}

impl ActiveOperation {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for ActiveOperation {
    fn drop(&mut self) {
        self.state.finish(&self.token);
    }
}
