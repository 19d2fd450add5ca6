//! Shared domain types for the coprocessor kernel.
//!
//! Instructions and pipelines, activation results, scheduler and budget
//! snapshots, the kernel message envelope, configuration, and the error
//! enums raised synchronously by the kernel's registries.
//!
//! Zero infrastructure dependencies -- only serde, schemars, uuid, chrono, thiserror.

pub mod activation;
pub mod budget;
pub mod config;
pub mod error;
pub mod instruction;
pub mod message;
pub mod pipeline;
pub mod scheduler;
pub mod team;
