//! # portal
//!
//! Blocking client for the Graphiant portal REST API.
//!
//! This crate provides:
//! - Session login and device/site name resolution
//! - Listing calls for the current state of devices and global objects
//! - Single-request writes (device config, global config, sites, LAN
//!   segments, site lists)
//! - Errors categorized at the transport boundary ([`ErrorCategory`])
//!
//! ## Example
//!
//! ```no_run
//! use portal::{Api, Client, GlobalKind};
//!
//! let client = Client::new("api.graphiant.com").login("admin", "secret").unwrap();
//!
//! for summary in client.global_summaries(GlobalKind::Snmps).unwrap() {
//!     println!("{}", summary["name"]);
//! }
//! ```
//!
//! Use [`api::MockPortal`] to run without a portal.

#![warn(clippy::all)]

pub mod api;
pub mod endpoints;
pub mod error;
pub mod types;

// Re-export main types at crate root
pub use api::http::{Client, DEFAULT_HOST};
pub use api::{Api, MockPortal, Request};
pub use error::{Error, ErrorCategory, Result};
pub use types::{DeviceSummary, Enterprise, GlobalKind, LanSegment, Site, SiteList};
