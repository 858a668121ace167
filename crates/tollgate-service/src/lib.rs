//! Tollgate HTTP service.
//!
//! This crate exposes the metered relay and the wallet API:
//!
//! - Chat completion relay with pre-flight credit admission and post-hoc
//!   usage billing (buffered and streaming)
//! - Wallet provisioning, balance, credit grants, and transaction history
//! - Price table invalidation
//!
//! # Authentication
//!
//! Two authentication methods are supported:
//!
//! 1. **Bearer tokens** - For end-user requests (relay, wallet reads)
//! 2. **Service API keys** - For service-to-service requests (wallet
//!    provisioning, credit grants, cache invalidation)

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers need async for consistency

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{CostSourceKind, ServiceConfig};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
