//! The coprocessor kernel.
//!
//! Decides in what order, at what token budget and through what signaling
//! discipline teams and their skills are activated during a multi-phase
//! workflow. Everything that discovers metadata or actually runs skills is
//! injected by the host through the traits in [`activation`].

pub mod activation;
pub mod budget;
pub mod config;
pub mod kernel;
pub mod message;
pub mod pipeline;
pub mod scheduler;
pub mod signal;
