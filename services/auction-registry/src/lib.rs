//! Auction Registry - Registration Coordinator
//!
//! Issues each participant of a peer-to-peer auction a CA-signed identity and
//! publishes the descriptor participants use to find one another.
//!
//! Key responsibilities:
//! - Open auctions (the caller becomes the seller)
//! - Register buyers and hand out their credential bundles
//! - Serve the auction descriptor and the root certificate

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod config;
pub mod handlers;
pub mod server;

pub use config::{ConfigError, ServiceConfig};
pub use server::{build_state, create_router, run};
