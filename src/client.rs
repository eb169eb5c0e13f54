//! Resilient invocation client for downstream services.
//!
//! Implementation details are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
mod error_classification;
pub mod request;

pub use self::builder::ResilientClientBuilder;
pub use self::core::{ResilientClient, REQUEST_ID_HEADER};
pub use self::request::{ServiceRequest, ServiceResponse};
