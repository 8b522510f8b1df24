//! Environment traits injected into the engine.
//!
//! All external dependencies are abstracted behind traits and handed to the
//! engine explicitly, so tests can substitute deterministic versions.

use crate::types::HoldToken;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Clock trait - abstracts time operations for testability
///
/// Two readings are exposed: wall-clock time for reporting (token creation
/// timestamps) and a monotonic instant for every deadline computation, so
/// expiry stays correct when the system clock is adjusted.
///
/// # Examples
///
/// ```
/// use seathold_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let a = clock.monotonic();
/// let b = clock.monotonic();
/// assert!(b >= a);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Get the current monotonic instant
    fn monotonic(&self) -> Instant;
}

/// Production clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Instant {
        Instant::now()
    }
}

/// Errors from persisting a hold token
#[derive(thiserror::Error, Debug)]
pub enum TokenStoreError {
    /// Reading or writing the backing file failed
    #[error("Token store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document could not be decoded
    #[error("Token store contents are invalid: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Storage for the active hold token, outside the engine.
///
/// `continue` sessions read the token back after a page reload; the engine
/// never assumes the store survives, it only relies on what `load` returns.
pub trait TokenStore: Send + Sync {
    /// Returns the stored token, if any
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be read.
    fn load(&self) -> Result<Option<HoldToken>, TokenStoreError>;

    /// Stores the token, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be written.
    fn store(&self, token: &HoldToken) -> Result<(), TokenStoreError>;

    /// Forgets the stored token
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be written.
    fn clear(&self) -> Result<(), TokenStoreError>;
}

/// Token store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    token: Mutex<Option<HoldToken>>,
}

impl InMemoryTokenStore {
    /// Creates an empty store
    #[must_use]
    pub const fn new() -> Self {
        Self {
            token: Mutex::new(None),
        }
    }

    /// Creates a store that already holds a token
    #[must_use]
    pub const fn with_token(token: HoldToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self) -> Result<Option<HoldToken>, TokenStoreError> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn store(&self, token: &HoldToken) -> Result<(), TokenStoreError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Token store persisted as a small JSON document on disk
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredToken {
    hold_token: HoldToken,
}

impl FileTokenStore {
    /// Creates a store writing to `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<HoldToken>, TokenStoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let stored: StoredToken = serde_json::from_slice(&bytes)?;
                Ok(Some(stored.hold_token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, token: &HoldToken) -> Result<(), TokenStoreError> {
        let bytes = serde_json::to_vec(&StoredToken {
            hold_token: token.clone(),
        })?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), TokenStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
