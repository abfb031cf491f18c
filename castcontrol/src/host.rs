//! Host capabilities injected at engine construction.
//!
//! The engine runs embedded in a host application that owns the platform
//! specifics. Instead of reaching for the filesystem or network state
//! directly, the engine goes through these traits; the host decides what
//! they mean on its platform. Tests substitute in-memory implementations.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::{Mutex, RwLock};

/// Readable, seekable media content. Files on desktop hosts; content
/// resolvers or asset handles elsewhere.
pub trait MediaRead: Read + Seek + Send {}
impl<T: Read + Seek + Send> MediaRead for T {}

/// Byte-level access to media the host wants served.
pub trait FileSource: Send + Sync {
    /// Open for reading. The path is host-defined (a filesystem path on
    /// desktop hosts).
    fn open(&self, path: &str) -> std::io::Result<Box<dyn MediaRead>>;

    /// Total size in bytes.
    fn len(&self, path: &str) -> std::io::Result<u64>;
}

/// Small persistent string store, used for known-good control URLs.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// LAN availability, gates discovery.
pub trait NetworkInfo: Send + Sync {
    fn lan_available(&self) -> bool;
}

/// Filesystem-backed [`FileSource`] for desktop hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFileSource;

impl FileSource for FsFileSource {
    fn open(&self, path: &str) -> std::io::Result<Box<dyn MediaRead>> {
        Ok(Box::new(File::open(Path::new(path))?))
    }

    fn len(&self, path: &str) -> std::io::Result<u64> {
        Ok(std::fs::metadata(Path::new(path))?.len())
    }
}

/// In-memory [`KvStore`]. Default when the host does not persist anything;
/// also the test double.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

/// [`NetworkInfo`] that assumes the LAN is always there. Hosts with real
/// connectivity tracking provide their own.
#[derive(Debug, Default)]
pub struct AlwaysOnNetwork;

impl NetworkInfo for AlwaysOnNetwork {
    fn lan_available(&self) -> bool {
        true
    }
}

/// Settable [`NetworkInfo`] for tests and hosts with connectivity callbacks.
#[derive(Debug)]
pub struct SharedNetworkInfo {
    available: RwLock<bool>,
}

impl SharedNetworkInfo {
    pub fn new(available: bool) -> Self {
        Self {
            available: RwLock::new(available),
        }
    }

    pub fn set_available(&self, available: bool) {
        *self.available.write().unwrap_or_else(|e| e.into_inner()) = available;
    }
}

impl NetworkInfo for SharedNetworkInfo {
    fn lan_available(&self) -> bool {
        *self.available.read().unwrap_or_else(|e| e.into_inner())
    }
}
