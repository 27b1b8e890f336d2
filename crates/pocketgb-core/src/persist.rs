//! Key-value backends for battery RAM and save-state blobs.
//!
//! The core only ever talks to a [`SaveStore`]; where the bytes end up (a map
//! in memory, files on disk, something a host provides) is the host's choice.
//! [`BackgroundStore`] moves writes onto a worker thread so persisting RAM
//! never stalls CPU stepping.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel as cb;
use log::{debug, warn};

use crate::error::PersistError;

pub trait SaveStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been stored under `key` yet.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError>;

    fn store(&self, key: &str, data: &[u8]) -> Result<(), PersistError>;
}

/// Turn a cartridge title into a key that is safe for any backend.
pub fn sanitize_key(title: &str) -> String {
    let key: String = title
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if key.is_empty() {
        "untitled".to_string()
    } else {
        key
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

impl SaveStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, data: &[u8]) -> Result<(), PersistError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.<extension>`.
pub struct FileStore {
    dir: PathBuf,
    extension: &'static str,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self::with_extension(dir, "sav")
    }

    pub fn with_extension<P: AsRef<Path>>(dir: P, extension: &'static str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            extension,
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key).with_extension(self.extension)
    }
}

impl SaveStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        if !path.is_file() {
            return Err(PersistError::Corrupt(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let data = fs::read(&path)?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Ok(Some(data))
    }

    fn store(&self, key: &str, data: &[u8]) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp", self.extension));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

enum Job {
    Store { key: String, data: Vec<u8> },
    Flush(cb::Sender<()>),
}

/// Forwards writes to a worker thread; loads go straight to the inner store.
pub struct BackgroundStore {
    inner: Arc<dyn SaveStore>,
    tx: Option<cb::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundStore {
    pub fn new(inner: Arc<dyn SaveStore>) -> Self {
        let (tx, rx) = cb::unbounded::<Job>();
        let backend = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("pocketgb-persist".to_string())
            .spawn(move || {
                for job in rx {
                    match job {
                        Job::Store { key, data } => {
                            if let Err(e) = backend.store(&key, &data) {
                                warn!("Failed to persist {key}: {e}");
                            }
                        }
                        Job::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            });

        match worker {
            Ok(handle) => Self {
                inner,
                tx: Some(tx),
                worker: Some(handle),
            },
            Err(e) => {
                warn!("Persistence worker unavailable, writing synchronously: {e}");
                Self {
                    inner,
                    tx: None,
                    worker: None,
                }
            }
        }
    }

    /// Block until every write queued so far has reached the inner store.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = cb::bounded(1);
        if tx.send(Job::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl SaveStore for BackgroundStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistError> {
        self.inner.load(key)
    }

    fn store(&self, key: &str, data: &[u8]) -> Result<(), PersistError> {
        match &self.tx {
            Some(tx) => tx
                .send(Job::Store {
                    key: key.to_string(),
                    data: data.to_vec(),
                })
                .map_err(|_| PersistError::Unavailable("persistence worker stopped".into())),
            None => self.inner.store(key, data),
        }
    }
}

impl Drop for BackgroundStore {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_replaces_punctuation() {
        assert_eq!(sanitize_key("POKEMON RED"), "POKEMON_RED");
        assert_eq!(sanitize_key("A/B:C"), "A_B_C");
        assert_eq!(sanitize_key("   "), "untitled");
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load("GAME").unwrap().is_none());
        store.store("GAME", &[1, 2, 3]).unwrap();
        assert_eq!(store.load("GAME").unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn file_store_writes_sav_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.store("TETRIS", &[0xAA; 4]).unwrap();
        assert_eq!(fs::read(dir.path().join("TETRIS.sav")).unwrap(), vec![0xAA; 4]);
        assert_eq!(store.load("TETRIS").unwrap(), Some(vec![0xAA; 4]));
        assert!(store.load("MISSING").unwrap().is_none());
    }

    #[test]
    fn file_store_rejects_directory_in_place_of_save() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("BROKEN.sav")).unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.load("BROKEN"),
            Err(PersistError::Corrupt(_))
        ));
    }

    #[test]
    fn background_store_flushes_to_inner() {
        let inner = Arc::new(MemoryStore::new());
        let bg = BackgroundStore::new(inner.clone());
        bg.store("KEY", &[9, 9]).unwrap();
        bg.flush();
        assert_eq!(inner.load("KEY").unwrap(), Some(vec![9, 9]));
    }

    #[test]
    fn background_store_drains_on_drop() {
        let inner = Arc::new(MemoryStore::new());
        {
            let bg = BackgroundStore::new(inner.clone());
            for i in 0..16u8 {
                bg.store(&format!("K{i}"), &[i]).unwrap();
            }
        }
        assert!(inner.contains("K15"));
    }
}
