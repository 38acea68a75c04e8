//! Login session shared by every outgoing request.
//!
//! The store is initialised once from its persisted file, changed only by
//! [`SessionStore::login`] and [`SessionStore::logout`], and broadcasts every
//! change to subscribers through a `watch` channel.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::user::User;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub token: String,
}

#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Option<Session>>,
}

impl SessionStore {
    /// Open the store backed by `path`, restoring any saved session. A corrupt
    /// file is treated as logged out.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let initial = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Session>(&contents) {
                Ok(session) => {
                    debug!("Restored session for {}", session.user.username);
                    Some(session)
                }
                Err(e) => {
                    warn!("Ignoring unreadable session file {}: {e}", path.display());
                    None
                }
            },
            Err(_) => None,
        };
        let (tx, _rx) = watch::channel(initial);
        Self {
            path: Some(path),
            tx,
        }
    }

    /// A store that lives only in memory.
    pub fn ephemeral() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { path: None, tx }
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.token.clone())
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    pub fn login(&self, user: User, token: String) -> Result<()> {
        let session = Session { user, token };
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_vec_pretty(&session)?)?;
        }
        info!("Logged in as {}", session.user.username);
        self.tx.send_replace(Some(session));
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if self.tx.send_replace(None).is_some() {
            info!("Logged out");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "1".into(),
            username: "admin".into(),
            name: Some("Admin".into()),
            email: Some("admin@example.com".into()),
            is_active: true,
            is_admin: true,
            created_at: None,
        }
    }

    #[test]
    fn test_login_persists_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = SessionStore::open(&path);
        assert_eq!(store.token(), None);
        store.login(user(), "tok-1".into()).unwrap();
        assert_eq!(store.token().as_deref(), Some("tok-1"));

        let reopened = SessionStore::open(&path);
        assert_eq!(reopened.current().unwrap().user.username, "admin");
        assert_eq!(reopened.token().as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_logout_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = SessionStore::open(&path);
        store.login(user(), "tok".into()).unwrap();
        store.logout().unwrap();
        assert!(!path.exists());
        assert_eq!(store.token(), None);
        // second logout is a no-op
        store.logout().unwrap();
    }

    #[test]
    fn test_corrupt_file_means_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SessionStore::open(&path).current().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = SessionStore::ephemeral();
        let mut rx = store.subscribe();
        store.login(user(), "abc".into()).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().token, "abc");
        store.logout().unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
