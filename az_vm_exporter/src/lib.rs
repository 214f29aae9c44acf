//! Prometheus exporter for the power state of Azure virtual machines.
//!
//! This library supports the `az-vm-exporter` binary found elsewhere in this
//! project. Each scrape of the HTTP endpoint lists the VMs of one resource
//! group, reads their instance views and answers with one `az_vm_info` sample
//! per VM.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod collector;
pub mod config;
pub mod exposition;
pub mod server;
