pub mod config;
pub mod error;
pub mod filters;
pub mod identity;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;
