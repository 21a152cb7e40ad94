//! PharmaChain: pharmaceutical supply-chain provenance.
//!
//! This crate provides:
//! - Role-based access control over caller identities
//! - A product registry recording origin, custody, lifecycle status and
//!   regulatory verification of each batch
//! - A supply-chain controller and a verification service that authorize
//!   callers and forward changes to the registry
//! - An append-only, hash-chained SQLite ledger of signed transactions from
//!   which all state is replayed
//! - C-ABI FFI exports for native callers
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod chain;
pub mod context;
pub mod controller;
pub mod events;
pub mod identity;
pub mod ledger;
pub mod product;
pub mod registry;
pub mod roles;
pub mod signing;
pub mod state;
pub mod tx;
pub mod util;
pub mod verification;

#[allow(unsafe_code)]
pub mod ffi;
