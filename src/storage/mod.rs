use std::fmt::Debug;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

pub mod disk;
pub mod heap;

pub mod memory;

/// A key/value storage engine, where both keys and values are arbitrary byte
/// strings. It is the persistence medium behind the disk scheduler, pages are
/// stored as one value per page id. Writes are only guaranteed durable after
/// calling flush().
/// The Storage trait is designed as `trait object` compatible, i.e., follow
/// the [object safety rules](https://doc.rust-lang.org/reference/items/traits.html#object-safety)
pub trait Storage: Debug + Send + Sync {
    /// Flushes any buffered data to underlying storage medium.
    fn flush(&self) -> Result<()>;

    /// Sets a value for a key, overwrite the existing value if any.
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Gets the value with a given key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Removes a key from the storage, returning the value at the key if the key
    /// was previously in the storage.
    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
}

pub fn new_storage(typ: StorageType) -> Result<Box<dyn Storage>> {
    match typ {
        StorageType::Memory => Ok(Box::new(memory::Memory::new())),
    }
}
