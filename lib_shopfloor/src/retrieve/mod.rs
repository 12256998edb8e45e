//! # Data Retrieval Module
//!
//! HTTP access to the MES backend. Every page resource (orders, pallets,
//! packaging lines, machine uptime) is fetched through the same client so that
//! URL joining, authentication, timeouts and error classification live in one
//! place.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, with an optional transient-retry middleware and a
//!   request timeout. Non-2xx answers are mapped to `FetchError::Status`.
//! - **`resource`**: Path templates filled from the session context, failing
//!   fast with a `PreconditionError` when a placeholder has no value.

/// Generic HTTP API client with optional retry middleware.
pub mod ky_http;
/// Endpoint path templates resolved against the session context.
pub mod resource;

pub use ky_http::{ApiClient, ApiClientOptions, ApiResponse};
pub use resource::PathTemplate;
