//! Core types and utilities for tollgate.
//!
//! This crate provides the foundational types used throughout the tollgate
//! metering platform:
//!
//! - **Identifiers**: `UserId`, `TransactionId`
//! - **Wallets**: `Wallet`, `Plan`, `WalletStatus`
//! - **Transactions**: `CreditTransaction`
//! - **Usage**: `BillableUsage`, `TokenCounts`
//! - **Credits**: USD → credit conversion
//!
//! # Credit unit
//!
//! One credit represents `credit_rate` USD of upstream spend (default
//! `$0.0015`). Conversion from USD always rounds **up**, so the platform
//! never under-charges by a fractional credit. Balances are stored as `i64`
//! credits; USD amounts use [`rust_decimal::Decimal`] to avoid floating
//! point drift at fractional-cent-per-million-token rates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod credits;
pub mod error;
pub mod ids;
pub mod transaction;
pub mod usage;
pub mod wallet;

pub use credits::{credits_for_usd, default_credit_rate, DEFAULT_MIN_CREDITS};
pub use error::{BillingError, Result};
pub use ids::{IdError, TransactionId, UserId};
pub use transaction::CreditTransaction;
pub use usage::{BillableUsage, TokenCounts};
pub use wallet::{Plan, Wallet, WalletStatus};
