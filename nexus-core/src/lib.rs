#![deny(missing_docs)]
//! Core cryptography for the Nexus secrets custodian.
//!
//! This crate contains the pure cryptographic building blocks of Nexus and has
//! no async code and no I/O:
//!
//! - [`material`] – the root-key and key-shard wrappers. Secret state here is
//!   zeroized on drop and deliberately does not implement `Debug`.
//! - [`shamir`] – threshold secret sharing of a 32-byte secret over the P-256
//!   scalar field, with deterministic re-splits.
//! - [`sealing`] – the AES-256-GCM seal/open primitive and its versioned wire
//!   format, used both for ciphertext at rest and for the
//!   encryption-as-a-service routes.
//!
//! Service-level concerns (who holds the root key, when shards travel to
//! Keepers, which peers may call which operation) live in `nexus-service`.

pub mod material;
pub mod sealing;
pub mod shamir;
