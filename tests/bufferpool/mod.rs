macro_rules! setup {
    ($name:ident, $pool_size:expr) => {
        setup!($name, $pool_size, 2);
    };
    ($name:ident, $pool_size:expr, $k:expr) => {
        let _ = env_logger::builder().is_test(true).try_init();
        let $name = framepool::storage::heap::BufferPoolManager::new(
            framepool::storage::new_storage(framepool::storage::StorageType::Memory)?,
            $pool_size,
            $k,
        )?;
    };
}

mod stamp;
mod tests;
