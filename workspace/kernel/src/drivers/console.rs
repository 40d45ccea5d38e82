//! Console device: buffered output and a keystroke queue.
//!
//! `putbuf` is the sink for `write(STDOUT_FILENO, ..)`; output accumulates in
//! a kernel buffer that the embedder (or a test) can drain. Input is a
//! bounded lock-free ring that the embedder feeds and `getc` drains one
//! keystroke at a time, blocking while empty.

use alloc::{vec::Vec, string::String};

use crossbeam_queue::ArrayQueue;

use crate::sync::SpinLock;

/// Capacity of the keystroke ring.
const INPUT_QUEUE_LEN: usize = 256;

pub struct Console {
    output: SpinLock<Vec<u8>>,
    input: ArrayQueue<u8>,
}

impl Console {
    pub fn new() -> Self {
        Console {
            output: SpinLock::new(Vec::new()),
            input: ArrayQueue::new(INPUT_QUEUE_LEN),
        }
    }

    /// Append `buf` to the console output.
    pub fn putbuf(&self, buf: &[u8]) {
        self.output.lock().extend_from_slice(buf);
    }

    /// Pop one keystroke, spinning until one is available.
    pub fn getc(&self) -> u8 {
        loop {
            if let Some(ch) = self.input.pop() {
                return ch;
            }
            core::hint::spin_loop();
        }
    }

    /// Feed keystrokes into the input ring. Returns how many were accepted
    /// before the ring filled up.
    pub fn push_input(&self, keys: &[u8]) -> usize {
        for (i, &ch) in keys.iter().enumerate() {
            if self.input.push(ch).is_err() {
                return i;
            }
        }
        keys.len()
    }

    /// Snapshot of everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    /// Drain the output buffer, returning its contents.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }

    /// Output interpreted as UTF-8, for diagnostics.
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_accumulates() {
        let console = Console::new();
        console.putbuf(b"hi ");
        console.putbuf(b"there");
        assert_eq!(console.output(), b"hi there");
        assert_eq!(console.take_output(), b"hi there");
        assert!(console.output().is_empty());
    }

    #[test]
    fn input_is_fifo() {
        let console = Console::new();
        assert_eq!(console.push_input(b"ab"), 2);
        assert_eq!(console.getc(), b'a');
        assert_eq!(console.getc(), b'b');
    }
}
