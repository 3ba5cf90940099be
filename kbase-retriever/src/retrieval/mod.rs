pub mod builder;
pub mod document;
pub mod document_watcher;
pub mod engine;
pub mod index;
pub mod snapshot;
pub mod staleness;
pub mod strategy;
