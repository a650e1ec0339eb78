//! Wizard session persistence.
//!
//! Each session is one JSON file under the store root. Writers go
//! through a per-session mutex, so `update` is atomic with respect to
//! concurrent updaters of the same session; different sessions never
//! contend. Files are written to a temp sibling and renamed into place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use farmhand_core::types::WizardSession;
use tokio::sync::Mutex;
use tracing::debug;

use crate::StoreError;

/// Async session document store, linearizable per session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; missing sessions are `NotFound`.
    async fn load(&self, session_id: &str) -> Result<WizardSession, StoreError>;

    /// Persist a session document as-is.
    async fn save(&self, session: &WizardSession) -> Result<(), StoreError>;

    /// Read-modify-write under the session's lock; returns the updated
    /// document.
    async fn update(
        &self,
        session_id: &str,
        mutate: Box<dyn for<'a> FnOnce(&'a mut WizardSession) + Send>,
    ) -> Result<WizardSession, StoreError>;
}

/// File-backed implementation: `<root>/<session_id>.json`.
pub struct JsonSessionStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonSessionStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding per-session working files.
    pub fn session_workdir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_key(session_id)?;
        let dir = self.root.join(session_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        validate_key(session_id)?;
        Ok(self.root.join(format!("{session_id}.json")))
    }

    async fn key_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_document(path: &Path, session_id: &str) -> Result<WizardSession, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_document(path: &Path, session: &WizardSession) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn validate_key(session_id: &str) -> Result<(), StoreError> {
    let plain = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(session_id.to_string()))
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn load(&self, session_id: &str) -> Result<WizardSession, StoreError> {
        let path = self.session_path(session_id)?;
        let lock = self.key_lock(session_id).await;
        let _guard = lock.lock().await;
        Self::read_document(&path, session_id).await
    }

    async fn save(&self, session: &WizardSession) -> Result<(), StoreError> {
        let path = self.session_path(&session.session_id)?;
        let lock = self.key_lock(&session.session_id).await;
        let _guard = lock.lock().await;
        Self::write_document(&path, session).await?;
        debug!(session_id = %session.session_id, "session saved");
        Ok(())
    }

    async fn update(
        &self,
        session_id: &str,
        mutate: Box<dyn for<'a> FnOnce(&'a mut WizardSession) + Send>,
    ) -> Result<WizardSession, StoreError> {
        let path = self.session_path(session_id)?;
        let lock = self.key_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = Self::read_document(&path, session_id).await?;
        mutate(&mut session);
        Self::write_document(&path, &session).await?;
        Ok(session)
    }
}
