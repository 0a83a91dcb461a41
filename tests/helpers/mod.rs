//! Common test utilities for integration tests
#![allow(dead_code)]

pub mod database;
pub mod models;
