//! Document store seam.
//!
//! Every document lives under a string key as JSON bytes. The trait mirrors
//! the shape of the Spin key-value API so the same handlers run inside a
//! Spin component and in the native host. No operation spans more than one
//! key; callers that touch several documents do so with independent writes.
//!
//! Mutations of an existing document go through [`DocumentStore::update`],
//! a read-modify-write of one key that concurrent writers of the same key
//! cannot interleave with.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// What an [`DocumentStore::update`] step wants stored.
#[derive(Debug, PartialEq, Eq)]
pub enum Write {
    Keep,
    Put(Vec<u8>),
}

pub trait DocumentStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn get_keys(&self) -> anyhow::Result<Vec<String>>;

    /// Runs `step` on the current value of `key` and stores what it returns,
    /// as one step with respect to other writers of `key`. `step` may run
    /// more than once and must not call back into the store.
    fn update(
        &self,
        key: &str,
        step: &mut dyn FnMut(Option<&[u8]>) -> anyhow::Result<Write>,
    ) -> anyhow::Result<()>;

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<'a> dyn DocumentStore + 'a {
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, &serde_json::to_vec(value)?)
    }

    /// Read-modify-write of one JSON document. `f` sees `None` for an absent
    /// key. The document is written back only when `f` returns `Ok` and the
    /// serialized value changed. The outer error is a store failure, the
    /// inner one is whatever `f` rejected with.
    pub fn update_json<T, R, E>(
        &self,
        key: &str,
        mut f: impl FnMut(&mut Option<T>) -> Result<R, E>,
    ) -> anyhow::Result<Result<R, E>>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut outcome = None;
        self.update(key, &mut |current: Option<&[u8]>| -> anyhow::Result<Write> {
            let mut doc: Option<T> = current
                .map(|bytes| serde_json::from_slice::<T>(bytes))
                .transpose()?;

            let result = f(&mut doc);
            let write = match (&result, &doc) {
                (Ok(_), Some(doc)) => {
                    let bytes = serde_json::to_vec(doc)?;
                    if current == Some(bytes.as_slice()) {
                        Write::Keep
                    } else {
                        Write::Put(bytes)
                    }
                }
                _ => Write::Keep,
            };
            outcome = Some(result);
            Ok(write)
        })?;

        outcome.ok_or_else(|| anyhow::anyhow!("update of {} never ran", key))
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .get_keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

/// In-process store used by the native host and by tests.
///
/// `BTreeMap` keeps `get_keys` output deterministic. `update` holds the lock
/// across its read and its write.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> anyhow::Result<usize> {
        Ok(self.data.lock().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("memory store lock poisoned")
}

impl DocumentStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.data
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.data.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn get_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.data.lock().map_err(poisoned)?.keys().cloned().collect())
    }

    fn update(
        &self,
        key: &str,
        step: &mut dyn FnMut(Option<&[u8]>) -> anyhow::Result<Write>,
    ) -> anyhow::Result<()> {
        let mut data = self.data.lock().map_err(poisoned)?;
        if let Write::Put(bytes) = step(data.get(key).map(Vec::as_slice))? {
            data.insert(key.to_string(), bytes);
        }
        Ok(())
    }
}

/// Spin key-value store, available inside the component. Plain reads and
/// writes use the Spin store API; `update` uses the compare-and-swap handle
/// of `wasi:keyvalue` on the same store.
#[cfg(target_arch = "wasm32")]
pub struct SpinStore {
    store: spin_sdk::key_value::Store,
    bucket: spin_sdk::wit::wasi::keyvalue::store::Bucket,
}

#[cfg(target_arch = "wasm32")]
const MAX_CAS_ATTEMPTS: usize = 16;

#[cfg(target_arch = "wasm32")]
impl SpinStore {
    pub fn open_default() -> anyhow::Result<Self> {
        let store = spin_sdk::key_value::Store::open_default()
            .map_err(|e| anyhow::anyhow!("failed to open key-value store: {:?}", e))?;
        let bucket = spin_sdk::wit::wasi::keyvalue::store::open("default")
            .map_err(|e| anyhow::anyhow!("failed to open key-value bucket: {:?}", e))?;
        Ok(SpinStore { store, bucket })
    }
}

#[cfg(target_arch = "wasm32")]
impl DocumentStore for SpinStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.store
            .get(key)
            .map_err(|e| anyhow::anyhow!("key-value get {} failed: {:?}", key, e))
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.store
            .set(key, value)
            .map_err(|e| anyhow::anyhow!("key-value set {} failed: {:?}", key, e))
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.store
            .delete(key)
            .map_err(|e| anyhow::anyhow!("key-value delete {} failed: {:?}", key, e))
    }

    fn get_keys(&self) -> anyhow::Result<Vec<String>> {
        self.store
            .get_keys()
            .map_err(|e| anyhow::anyhow!("key-value list failed: {:?}", e))
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.store
            .exists(key)
            .map_err(|e| anyhow::anyhow!("key-value exists {} failed: {:?}", key, e))
    }

    fn update(
        &self,
        key: &str,
        step: &mut dyn FnMut(Option<&[u8]>) -> anyhow::Result<Write>,
    ) -> anyhow::Result<()> {
        use spin_sdk::wit::wasi::keyvalue::atomics::{self, Cas, CasError};

        let mut cas = Cas::new(&self.bucket, key)
            .map_err(|e| anyhow::anyhow!("key-value cas {} failed: {:?}", key, e))?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = cas
                .current()
                .map_err(|e| anyhow::anyhow!("key-value cas read {} failed: {:?}", key, e))?;
            let bytes = match step(current.as_deref())? {
                Write::Keep => return Ok(()),
                Write::Put(bytes) => bytes,
            };

            match atomics::swap(cas, &bytes) {
                Ok(()) => return Ok(()),
                Err(CasError::CasFailed(next)) => cas = next,
                Err(CasError::StoreError(e)) => {
                    anyhow::bail!("key-value swap {} failed: {:?}", key, e)
                }
            }
        }

        anyhow::bail!("gave up on {} after {} conflicting writes", key, MAX_CAS_ATTEMPTS)
    }
}
