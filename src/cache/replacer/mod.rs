//! Eviction policy implementations (replacers).
//!
//! Currently implements:
//! - [`FifoReplacer`] - First-in first-out

mod fifo;

pub use fifo::FifoReplacer;
