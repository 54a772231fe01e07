//! Shared fixtures.

pub mod mock_ws;
