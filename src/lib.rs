#![doc = include_str!("../README.md")]

mod alerts;
mod alloc;
pub mod capture;
mod config;
mod error;
mod health;
mod heap;
mod history;
mod ledger;
pub mod logging;
mod profiler;
pub mod retention;
mod size;
mod stats;
pub mod suggest;
mod tracker;

pub use alerts::*;
pub use alloc::*;
pub use capture::{CaptureInput, FirefoxCapture, HeapCapture};
pub use config::*;
pub use error::*;
pub use health::*;
pub use heap::*;
pub use history::*;
pub use ledger::*;
pub use profiler::*;
pub use size::*;
pub use stats::*;
pub use tracker::*;
