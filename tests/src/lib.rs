//! Shared harness for the gateway's end-to-end tests.

pub mod mocks;
