//! Object identity and hash computation for the grit object database.
//!
//! Everything in a git repository is addressed by the SHA-1 of its content.
//! This crate provides the 20-byte [`ObjectId`], the hex codec for its
//! textual form, and a streaming [`Hasher`](hasher::Hasher) used wherever
//! bytes must be digested while they are written.

mod error;
pub mod hasher;
pub mod hex;
mod oid;

pub use error::HashError;
pub use oid::ObjectId;
