//! Integration tests with mock HTTP servers

pub mod circuit_breaker;
pub mod facades;
pub mod gateway;
pub mod health_probe;
pub mod mock_server;
