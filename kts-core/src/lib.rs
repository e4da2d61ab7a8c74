//! Core cryptographic functionality for KTS
//!
//! This crate provides:
//! - Hash tree construction for aggregation rounds and the calendar
//! - Signature and hash chain verification
//! - Random nonce generation
//! - The publications file codec
//! - The [`Token`] capability trait used by the verification engine

pub mod merkle;
pub mod nonce;
pub mod publications;
pub mod token;
pub mod verify;

pub use merkle::{AggregationLeaf, HashTree, HashTreeBuilder};
pub use nonce::NonceGenerator;
pub use publications::{PublicationsFile, PublicationsFileBuilder, VerificationInfo};
pub use token::Token;
pub use verify::{verify_signature, VerificationError};
