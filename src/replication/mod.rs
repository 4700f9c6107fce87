//! Primary → replica log shipping.
//!
//! The primary appends one frame per committed transaction to a sidecar
//! segment log; a replica applies frames in order and tracks an
//! `(epoch, log_index)` cursor. An epoch bump on the primary
//! invalidates every replica cursor and forces a snapshot reseed.

pub mod log_store;
pub mod manifest;
pub mod primary;
pub mod replica;
pub mod transport;
pub mod types;
