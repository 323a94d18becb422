#![doc = include_str!("../README.md")]

mod allocator;
mod config;
mod error;
mod generator;
mod layout;
mod rand;
mod ring;
mod sequence;
mod time;

pub use crate::allocator::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::layout::*;
pub use crate::rand::*;
pub use crate::ring::*;
pub use crate::sequence::*;
pub use crate::time::*;

/// Re-exported for [`GeneratorConfig::epoch`].
pub use chrono::NaiveDate;
