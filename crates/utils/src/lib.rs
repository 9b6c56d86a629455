//! Shared helpers for strand crates
//!
//! - [`clock`]: injectable wall clock
//! - [`temp`]: timestamped staging directories
//! - [`atomic_file`]: atomic file writes and crash-safe directory swaps
//! - [`logging`]: tracing subscriber setup for binaries

pub mod atomic_file;
pub mod clock;
pub mod logging;
pub mod temp;

pub use atomic_file::{recover_interrupted_swap, swap_dir, write_atomic};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use temp::{create_temp_dir, remove_stale_temp_dirs, temp_name};
