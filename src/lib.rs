//! Git upload-pack server implementation for gitoxide
//!
//! This crate provides a complete implementation of Git's upload-pack service,
//! which handles client requests for fetching objects from a Git repository.
//! It supports both protocol v1 and v2, with full feature parity with Git's
//! native upload-pack implementation.
//!
//! # Features
//!
//! - Full protocol v1 and v2 support
//! - Shallow clone and partial clone support
//! - Object filtering (blob size, tree depth, etc.)
//! - Sideband communication
//! - Multi-ack negotiation algorithms
//! - Ref advertisement and filtering
//! - Hook support for customization
//! - Comprehensive capability management
//! - Drop-in replacement for git-upload-pack
//!
//! # Example Usage
//!
//! ```no_run
//! use upload_pack_engine::{Server, ServerOptions};
//! use std::io::{stdin, stdout};
//!
//! // Create a server instance
//! let options = ServerOptions::default()
//!     .with_stateless_rpc(false)
//!     .with_advertise_refs(false);
//!
//! let mut server = Server::new("/path/to/repo", options)?;
//!
//! // Handle upload-pack protocol (now synchronous)
//! let stdin = stdin();
//! let stdout = stdout();
//! server.serve(stdin.lock(), stdout.lock())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(rust_2018_idioms)]
// #![warn(missing_docs, clippy::all, clippy::pedantic)]

pub mod capabilities;
pub mod command;
pub mod config;
pub mod error;
pub mod filter;
pub mod negotiation;
pub mod pack;
pub mod packet_io;
pub mod policy;
pub mod protocol;
pub mod reachability;
pub mod references;
mod server;
pub mod shallow;
mod types;

pub use config::ServerOptions;
pub use error::{Error, Result};
pub use server::{Server, ServerBuilder};
pub use types::*;

/// The version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
