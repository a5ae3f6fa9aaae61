use std::collections::BTreeMap;
use std::sync::Mutex;

use super::Storage;
use crate::error::Result;

/// In-memory storage engine, page images live in an ordered map.
#[derive(Debug, Default)]
pub struct Memory {
    bm: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory { bm: Mutex::new(BTreeMap::new()) }
    }
}

impl Storage for Memory {
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let key = Vec::from(key);
        let mut bm = self.bm.lock()?;
        bm.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let bm = self.bm.lock()?;
        let value = bm.get(key);
        Ok(value.cloned())
    }

    fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut bm = self.bm.lock()?;
        Ok(bm.remove(key))
    }
}
