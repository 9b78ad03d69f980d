pub mod asset_store;
pub mod bucket_manager;
pub mod catalog_linker;
pub mod chunk_store;
pub mod error;
pub mod file_registry;
pub mod importer;
pub mod ingestion;
pub mod retrieval;
