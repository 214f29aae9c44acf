//! Azure identity and compute management, trimmed to what the VM exporter
//! needs.
//!
//! Two collaborators live here: a [`ClientSecretCredential`] that turns a
//! service principal into bearer tokens, and a [`ComputeClient`] that lists a
//! resource group's virtual machines and reads their instance views. Both are
//! reached through traits, [`TokenCredential`] and [`ComputeApi`], so callers
//! can substitute fakes.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

pub mod client;
pub mod credential;
pub mod models;

pub use client::{ComputeApi, ComputeClient};
pub use credential::{AccessToken, ClientSecretCredential, TokenCredential};
pub use models::{InstanceView, PowerStateError, VirtualMachine};
