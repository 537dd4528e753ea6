//! History Ring
//!
//! Fixed-capacity ring of recent samples, used for gauge histories.

mod buffer;

pub use buffer::{HistoryRing, DEFAULT_CAPACITY};
