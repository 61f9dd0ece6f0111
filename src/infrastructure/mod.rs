pub mod broker;
pub mod cache;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub(crate) mod staging;
