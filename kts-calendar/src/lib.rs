//! KTS calendar service
//!
//! Aggregates sign requests into signed calendar rounds, extends tokens
//! to published calendar roots and serves the signed publications file.

pub mod batch;
pub mod calendar;
pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod signer;

#[cfg(feature = "test-util")]
pub mod testutil;

pub use calendar::Calendar;
pub use config::CalendarConfig;
pub use error::CalendarError;
pub use server::CalendarServer;
pub use signer::{Signer, SoftwareSigner};
