// Library entrypoint for integration tests and internal reuse.
pub mod api;
pub mod core;
pub mod services;
pub mod storage;

pub use crate::api::build_router;
pub use crate::core::{auth, config, shutdown, state};
