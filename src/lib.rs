pub mod config;
pub mod diagnostics;
pub mod domain;
pub mod history;
pub mod logging;
pub mod paths;
pub mod storage;
pub mod store;
