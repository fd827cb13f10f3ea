pub mod browser;
pub mod capture;
pub mod core;
pub mod crawl;
pub mod extract;
pub mod storage;

// --- Primary core exports ---
pub use core::config;
pub use core::types;
