//! HTTP server

pub mod http;

pub use http::{run, AppState};

#[cfg(test)]
pub use http::test_state;
