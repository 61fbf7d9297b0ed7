//! The store catalog: maps store names to open stores and owns their workers.
//!
//! A persistent catalog lives under `Config::root` and holds an exclusive
//! lock on it while open. Dropping the catalog closes every store queue and
//! waits for the workers to finish the jobs already queued.

use crate::codec::WriteOptions;
use crate::commit_log::CommitLog;
use crate::config::Config;
use crate::consts::{LOCK_FILE, MAX_STORE_NAME_LEN, STORE_METADATA_FILE};
use crate::errors::{ArgumentError, ArgumentErrorKind, ClientError};
use crate::store::{write_options, Store};
use crate::util::{remove_dir_if_exists, store_dir_name};
use anyhow::{anyhow, Error, Result};
use fs2::FileExt;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// Checks a store name: it must be present, non-empty, free of backslashes and
/// at most [`MAX_STORE_NAME_LEN`] characters long.
pub fn validate_store_name(name: Option<&str>) -> Result<&str> {
    let name = name.ok_or_else(|| {
        Error::new(ArgumentError::new("storeName", ArgumentErrorKind::Null))
    })?;
    if name.is_empty() {
        return Err(Error::new(ArgumentError::new(
            "storeName",
            ArgumentErrorKind::Empty,
        )));
    }
    if name.contains('\\') {
        return Err(Error::new(ArgumentError::new(
            "storeName",
            ArgumentErrorKind::InvalidCharacter('\\'),
        )));
    }
    let len = name.chars().count();
    if len > MAX_STORE_NAME_LEN {
        return Err(Error::new(ArgumentError::new(
            "storeName",
            ArgumentErrorKind::TooLong {
                max: MAX_STORE_NAME_LEN,
                actual: len,
            },
        )));
    }
    Ok(name)
}

#[derive(Debug)]
pub(crate) struct Catalog {
    config: Arc<Config>,
    stores: RwLock<BTreeMap<String, Arc<Store>>>,
    // names whose stores are being built outside the registry lock
    reserved: Mutex<BTreeSet<String>>,
    this: Weak<Catalog>,
    // keeps the interprocess lock alive for the lifetime of the catalog
    _lock_file: Option<File>,
}

fn acquire_lock(root: &Path) -> Result<File> {
    std::fs::create_dir_all(root)?;
    let lock_path = root.join(LOCK_FILE);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)?;
    if let Err(e) = lock_file.try_lock_exclusive() {
        return Err(anyhow!(
            "Failed to open quadlog root: could not acquire exclusive lock on {:?}: {}. Another process has it open.",
            lock_path,
            e
        ));
    }
    Ok(lock_file)
}

impl Catalog {
    /// Opens the catalog described by `config`, loading every store found
    /// under its root.
    pub(crate) fn open(config: Config) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        let lock_file = if config.temporary {
            None
        } else {
            let lock = acquire_lock(&config.root)?;
            std::fs::create_dir_all(config.stores_dir())?;
            if !config.config_path().exists() {
                config.save_to_file(&config.config_path())?;
            }
            Some(lock)
        };

        let mut stores: BTreeMap<String, Arc<Store>> = BTreeMap::new();
        if !config.temporary {
            for entry in walkdir::WalkDir::new(config.stores_dir())
                .min_depth(1)
                .max_depth(1)
            {
                let entry = entry?;
                if !entry.file_type().is_dir() {
                    continue;
                }
                if !entry.path().join(STORE_METADATA_FILE).exists() {
                    warn!(
                        "Removing incomplete store directory {}",
                        entry.path().display()
                    );
                    remove_dir_if_exists(entry.path())?;
                    continue;
                }
                let store = match Store::open(entry.path(), config.clone()) {
                    Ok(store) => store,
                    Err(e) => {
                        warn!(
                            "Skipping unreadable store directory {}: {:#}",
                            entry.path().display(),
                            e
                        );
                        continue;
                    }
                };
                debug!(
                    "Loaded store '{}' at commit {}",
                    store.name(),
                    store.log().latest()
                );
                // a directory left behind by an interrupted delete can carry
                // the same name as its successor; the newest incarnation wins
                if let Some(other) = stores.get(store.name()) {
                    if other.created_at() >= store.created_at() {
                        warn!(
                            "Ignoring older incarnation of store '{}' in {}",
                            store.name(),
                            entry.path().display()
                        );
                        continue;
                    }
                    warn!(
                        "Ignoring older incarnation of store '{}' in {}",
                        other.name(),
                        other.dir().map(|d| d.display().to_string()).unwrap_or_default()
                    );
                }
                stores.insert(store.name().to_string(), Arc::new(store));
            }
        }

        let catalog = Arc::new_cyclic(|this| Catalog {
            config,
            stores: RwLock::new(stores),
            reserved: Mutex::new(BTreeSet::new()),
            this: this.clone(),
            _lock_file: lock_file,
        });
        for store in catalog.read_stores().values() {
            store.start_worker(catalog.this.clone())?;
        }
        info!(
            "Opened catalog at {} with {} stores",
            catalog.config.root.display(),
            catalog.read_stores().len()
        );
        Ok(catalog)
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    fn read_stores(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<Store>>> {
        self.stores.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_stores(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Store>>> {
        self.stores.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_dir(&self, name: &str) -> Option<PathBuf> {
        if self.config.temporary {
            None
        } else {
            Some(self.config.stores_dir().join(store_dir_name(name)))
        }
    }

    pub(crate) fn get(&self, name: &str) -> Result<Arc<Store>> {
        self.read_stores()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(ClientError::StoreNotFound(name.to_string())))
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.read_stores().contains_key(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.read_stores().keys().cloned().collect()
    }

    pub(crate) fn create(&self, name: &str) -> Result<Arc<Store>> {
        self.create_store_with(name, |dir, write| match dir {
            Some(dir) => CommitLog::create(dir, write),
            None => Ok(CommitLog::in_memory()),
        })
    }

    /// Creates and registers a store whose commit log is produced by `init`.
    ///
    /// The name is reserved first, so two creations of the same name cannot
    /// both succeed, and `init` runs without holding the registry lock: a
    /// slow snapshot does not stall lookups of other stores. The store only
    /// becomes visible once it is fully built.
    pub(crate) fn create_store_with<F>(&self, name: &str, init: F) -> Result<Arc<Store>>
    where
        F: FnOnce(Option<&Path>, WriteOptions) -> Result<CommitLog>,
    {
        let name = validate_store_name(Some(name))?;
        let reservation = self.reserve(name)?;

        let dir = self.store_dir(name);
        let built = init(dir.as_deref(), write_options(&self.config))
            .and_then(|log| Store::new(name, dir.clone(), self.config.clone(), log))
            .map(Arc::new)
            .and_then(|store| {
                store.start_worker(self.this.clone())?;
                Ok(store)
            });
        let store = match built {
            Ok(store) => store,
            Err(e) => {
                if let Some(dir) = &dir {
                    let _ = remove_dir_if_exists(dir);
                }
                return Err(e);
            }
        };

        let mut stores = self.write_stores();
        stores.insert(name.to_string(), store.clone());
        drop(reservation);
        drop(stores);
        info!("Created store '{}'", name);
        Ok(store)
    }

    // Lock order: registry, then reservations.
    fn reserve(&self, name: &str) -> Result<Reservation<'_>> {
        let stores = self.read_stores();
        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        if stores.contains_key(name) || !reserved.insert(name.to_string()) {
            return Err(Error::new(ClientError::StoreExists(name.to_string())));
        }
        Ok(Reservation {
            catalog: self,
            name: name.to_string(),
        })
    }

    /// Removes a store. Jobs still queued against it complete with errors.
    pub(crate) fn delete(&self, name: &str) -> Result<()> {
        let store = self
            .write_stores()
            .remove(name)
            .ok_or_else(|| Error::new(ClientError::StoreNotFound(name.to_string())))?;
        // the registry lock is released before waiting on the worker
        store.destroy()
    }
}

/// Holds a store name while the store is being built; released on drop.
struct Reservation<'a> {
    catalog: &'a Catalog,
    name: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.catalog
            .reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

impl Drop for Catalog {
    fn drop(&mut self) {
        let stores = std::mem::take(&mut *self.write_stores());
        for store in stores.values() {
            store.shutdown();
        }
        debug!("Closed catalog at {}", self.config.root.display());
    }
}
