#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strata Core
//!
//! Identifiers and keys shared by every Strata crate.
//!
//! ## Key Components
//!
//! - **Identifiers**: [`NodeId`], [`WorkflowId`], [`RunId`]
//! - **Type tags**: [`TypeTag`], the normalized key a node uses to name its plugin
//!
//! ## Usage
//!
//! ```rust
//! use strata_core::{NodeId, RunId, TypeTag};
//!
//! let run = RunId::v4();
//! let node = NodeId::v4();
//! let tag: TypeTag = "CSV Read".parse().unwrap();
//! assert_eq!(tag.as_str(), "csv_read");
//! ```

pub mod id;
mod keys;

pub use id::*;
pub use keys::{TypeTag, TypeTagError};
