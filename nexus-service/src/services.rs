//! Service layer of a Nexus instance.
//!
//! - [`root_key_store`] – the process-wide root-key cell.
//! - [`keeper_client`] – JSON RPCs to Keeper peers.
//! - [`bootstrap`] – the day-zero / recovery / steady-state engine.
//! - [`backing_store`] – the versioned secret KV (in-memory and sealed
//!   SQLite implementations).
//! - [`policy_store`] – compiled access policies.
//! - [`recovery`] – operator break-glass shard export/import.

pub mod backing_store;
pub(crate) mod bootstrap;
pub mod keeper_client;
pub mod policy_store;
pub mod recovery;
pub mod root_key_store;
