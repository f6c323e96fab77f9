//! Infrastructure adapters and runtime bootstrap.

pub mod cdn;
pub mod cms;
pub mod db;
pub mod error;
pub mod http;
pub mod lock;
pub mod notify;
pub mod object_store;
pub mod telemetry;
