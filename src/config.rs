use serde::Deserialize;

use crate::error::Result;
use crate::storage::StorageType;

#[derive(Debug, PartialEq, Deserialize)]
pub struct Config {
    pub log_level: String,

    pub storage_type: StorageType,

    /// number of frames in the buffer pool.
    pub pool_size: usize,
    /// history depth of the LRU-K replacer.
    pub replacer_k: usize,
    /// how many evicted nodes the replacer remembers.
    pub history_capacity: usize,
}

impl Config {
    pub fn new(file: &str) -> Result<Config> {
        let mut cfg = config::Config::builder()
            .set_default("log_level", "info")?
            .set_default("storage_type", "memory")?
            .set_default("pool_size", 64)?
            .set_default("replacer_k", 2)?
            .set_default("history_capacity", 64)?;
        if !file.is_empty() {
            cfg = cfg.add_source(config::File::with_name(file))
        }
        cfg = cfg.add_source(config::Environment::with_prefix("FRAMEPOOL"));
        Ok(cfg.build()?.try_deserialize()?)
    }
}
