//! Integration test support for perpdesk-app.

pub mod common;
