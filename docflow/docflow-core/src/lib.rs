pub mod activity;
pub mod auth;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod events;
pub mod permissions;
pub mod role;
pub mod search;
pub mod storage;
pub mod versions;
pub mod workflow;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result, StorageError};
pub use role::{Caller, Role};
