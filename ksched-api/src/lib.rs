//! ksched API - shared types and collaborator contracts
//!
//! This crate holds everything the process/scheduling core and its
//! collaborators need to agree on:
//!
//! - **Types**: process identifiers, process states, scheduling policies,
//!   sleep channels and the saved user register file
//! - **Error**: the common error type and `Result` alias
//! - **Config**: tunable scheduler parameters
//! - **Interfaces**: the address-space, file-layer and trap-frame contracts
//!   the core consumes but does not implement
//!
//! # Usage
//!
//! ```rust
//! use ksched_api::{SchedConfig, SchedPolicy};
//!
//! let config = SchedConfig {
//!     ncpu: 2,
//!     default_policy: SchedPolicy::RoundRobin,
//!     ..SchedConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

#![no_std]

extern crate alloc;

pub mod config;
pub mod error;
pub mod interfaces;
pub mod types;

pub use crate::config::{Ratio, SchedConfig};
pub use crate::error::{Error, Result};
pub use crate::interfaces::{AddressSpaceManager, FileLayer, TrapFrameAllocator};
pub use crate::types::*;
