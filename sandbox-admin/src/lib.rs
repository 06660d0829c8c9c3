//! The sandbox admin HTTP surface (component K) as a library: the binary in
//! `main.rs` wires real infrastructure around [`state::AppState`] and serves
//! [`router::build_router`]; integration tests do the same against mocked
//! or disabled dependencies.

pub mod router;
pub mod state;
