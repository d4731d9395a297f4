//! Core types and utilities for cassctl.
//!
//! This crate provides the foundational types shared by the cassctl crates:
//!
//! - **Resources**: Strongly-typed resource names and resource lists
//! - **Quantities**: Parsing of Kubernetes quantity strings into canonical units
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use cassctl_core::{Quantity, ResourceList, ResourceName};
//!
//! let cpu: Quantity = "1500m".parse().unwrap();
//! let memory: Quantity = "2Gi".parse().unwrap();
//!
//! let mut requests = ResourceList::new();
//! requests.insert_quantity(ResourceName::cpu(), &cpu).unwrap();
//! requests.insert_quantity(ResourceName::memory(), &memory).unwrap();
//!
//! assert_eq!(requests.get(&ResourceName::cpu()), 1500);
//! assert_eq!(requests.get(&ResourceName::memory()), 2 * 1024 * 1024 * 1024);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod quantity;
pub mod resources;

pub use error::{CoreError, Result};
pub use quantity::Quantity;
pub use resources::{ResourceList, ResourceName};
