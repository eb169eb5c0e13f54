//! Outbound HTTP plumbing shared by the client, the health prober and the registry refresher.

pub mod http;

pub use http::{HttpCall, HttpResponse, HttpTransport, TransportError};
