//! CloudSync Core - Domain types, ports and configuration
//!
//! This crate contains the hexagonal architecture core of the S3 transfer engine:
//! - **Domain types** - `ObjectRef`, `ByteRange`, `CompletedPart`, `MultipartSession`
//! - **Error taxonomy** - `StoreError` and its retry classification `ErrorClass`
//! - **Provider quirks** - `ProviderQuirks` resolved once per backend from a fixed table
//! - **Port definitions** - The `ObjectStore` capability trait implemented by adapters
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! The domain module holds pure value types with no I/O. Ports define the trait
//! that provider adapters implement; the transfer engine depends only on that
//! trait, never on a concrete provider.

pub mod config;
pub mod domain;
pub mod ports;
