//! Device layer: block storage and the console.

pub mod block;
pub mod console;

pub use block::{BlockDevice, BlockError, RamDisk, SECTOR_SIZE};
pub use console::Console;
