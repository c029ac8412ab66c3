//! Account credentials
//!
//! The bearer token and account email live in a small JSON file written by
//! `polaris login`. It is loaded once at process start into a
//! [`CredentialStore`] that is passed to the sync dispatcher and the probes;
//! the daemon reloads it on `SIGHUP`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub trait CredentialProvider: Send + Sync {
    /// Bearer token, `None` when logged out
    fn token(&self) -> Option<String>;

    /// Account email used as the owner of stored rows
    fn email(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub email: String,
}

pub struct CredentialStore {
    path: PathBuf,
    current: RwLock<Credentials>,
}

impl CredentialStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let current = read_file(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    /// Re-read the file, picking up a login from another process
    pub fn reload(&self) -> Result<()> {
        let fresh = read_file(&self.path)?;
        *self.write_guard() = fresh;
        debug!("Reloaded credentials from {:?}", self.path);
        Ok(())
    }

    pub fn set(&self, token: &str, email: &str) -> Result<()> {
        let creds = Credentials {
            token: token.to_string(),
            email: email.to_string(),
        };
        write_file(&self.path, &creds)?;
        *self.write_guard() = creds;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {:?}", self.path))?;
        }
        *self.write_guard() = Credentials::default();
        Ok(())
    }

    fn snapshot(&self) -> Credentials {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Credentials> {
        match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CredentialProvider for CredentialStore {
    fn token(&self) -> Option<String> {
        present(self.snapshot().token)
    }

    fn email(&self) -> Option<String> {
        present(self.snapshot().email)
    }
}

/// Fixed credentials, for one-shot commands and tests
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Credentials);

impl StaticCredentials {
    pub fn new(token: &str, email: &str) -> Self {
        Self(Credentials {
            token: token.to_string(),
            email: email.to_string(),
        })
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> Option<String> {
        present(self.0.token.clone())
    }

    fn email(&self) -> Option<String> {
        present(self.0.email.clone())
    }
}

fn present(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn read_file(path: &Path) -> Result<Credentials> {
    if !path.exists() {
        return Ok(Credentials::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials: {path:?}"))?;
    serde_json::from_str(&contents).with_context(|| format!("Malformed credentials: {path:?}"))
}

fn write_file(path: &Path, creds: &Credentials) -> Result<()> {
    let contents = serde_json::to_string_pretty(creds)?;
    std::fs::write(path, contents).with_context(|| format!("Failed to write {path:?}"))
}
