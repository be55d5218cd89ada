//! Bearer credential storage
//!
//! Tokens come in two flavours: persistent ones survive a restart, session
//! ones live only as long as the process. Reads prefer the persistent slot.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<String>;

    fn set(&self, token: &str, persistent: bool) -> std::io::Result<()>;

    /// Remove the token from both slots
    fn clear(&self);
}

#[derive(Debug, Default)]
struct Slots {
    durable: Option<String>,
    session: Option<String>,
}

/// In-process store; "persistent" only means it outranks the session slot
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slots: Mutex<Slots>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session = Some(token.into());
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.durable.clone().or_else(|| slots.session.clone())
    }

    fn set(&self, token: &str, persistent: bool) -> std::io::Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if persistent {
            slots.durable = Some(token.to_string());
        } else {
            slots.session = Some(token.to_string());
        }
        Ok(())
    }

    fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.durable = None;
        slots.session = None;
    }
}

/// Persistent tokens go to a file, session tokens stay in memory. The file
/// is read once at construction; afterwards the in-memory copy is served.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    slots: Mutex<Slots>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let durable = read_token(&path);
        Self {
            path,
            slots: Mutex::new(Slots {
                durable,
                session: None,
            }),
        }
    }
}

fn read_token(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let token = raw.trim();
    (!token.is_empty()).then(|| token.to_string())
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.durable.clone().or_else(|| slots.session.clone())
    }

    fn set(&self, token: &str, persistent: bool) -> std::io::Result<()> {
        if persistent {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.path, token)?;
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if persistent {
            slots.durable = Some(token.to_string());
        } else {
            slots.session = Some(token.to_string());
        }
        Ok(())
    }

    fn clear(&self) {
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.durable = None;
            slots.session = None;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove credential file");
            }
        }
    }
}
