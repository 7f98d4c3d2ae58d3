//! Core types for the lockstep co-simulation broker.
//!
//! This crate provides the foundational types used throughout the broker:
//!
//! - **Simulated time**: [`SimTime`], a nanosecond count with the arithmetic
//!   the time coordinator needs, and [`parse_duration`] for the `"100ms"`
//!   text form used in configs and on the command line.
//! - **Identity**: [`SimId`], a simulator's name as carried in the transport
//!   sender frame.
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod identity;
mod time;

pub use identity::SimId;
pub use time::{parse_duration, SimTime, TimeParseError};
