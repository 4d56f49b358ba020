pub mod file_store;

pub use calha_core::MemoryStore;
pub use file_store::JsonFileStore;
