//! # kestrel-api
//!
//! Typed REST client for the backend's `/api` surface.
//!
//! All endpoints speak JSON. Non-2xx responses carry `{"detail": "..."}`;
//! [`ApiError::Status`] surfaces that detail as the error message.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;

pub use client::{ApiClient, HealthStatus};
pub use errors::ApiError;
