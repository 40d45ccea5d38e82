//! Simulated user-mode execution context.
//!
//! A [`UserEnv`] is what a program body runs against: user loads and stores
//! that go through the page directory (faulting on a miss, exactly like the
//! MMU), a stack pointer, and the trap into the syscall gate. An access that
//! the fault handler refuses terminates the process with status −1, and
//! every entry point afterwards reports [`Exited`].

use alloc::sync::Arc;

use zerocopy::{byteorder::little_endian, FromBytes, IntoBytes};

use silica_abi::WORD_SIZE;

use crate::{
    memory::{
        addr::{VirtPage, USER_TOP},
        page,
        pagedir::PdMiss,
        PAGE_SIZE,
    },
    process::{self, Process},
    syscall::{self, TrapFrame, TrapOutcome},
    Kernel,
};

/// The process stopped running (trap or fault); no further user execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exited;

pub struct UserEnv<'k> {
    kernel: &'k Kernel,
    proc: Arc<Process>,
    esp: usize,
    exit_status: Option<i32>,
}

impl<'k> UserEnv<'k> {
    pub(crate) fn new(kernel: &'k Kernel, proc: Arc<Process>) -> Self {
        UserEnv {
            kernel,
            proc,
            esp: USER_TOP,
            exit_status: None,
        }
    }

    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.proc
    }

    pub fn esp(&self) -> usize {
        self.esp
    }

    pub fn set_esp(&mut self, esp: usize) {
        self.esp = esp;
    }

    /// Status the process exited with, if it has.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// User load: copy `buf.len()` bytes from `addr`.
    pub fn read_bytes(&mut self, addr: usize, buf: &mut [u8]) -> Result<(), Exited> {
        self.access(addr, buf.len(), false, |page_off, n, offset, bytes| {
            buf[offset..offset + n].copy_from_slice(&bytes[page_off..page_off + n]);
        })
    }

    /// User store: copy `data` to `addr`.
    pub fn write_bytes(&mut self, addr: usize, data: &[u8]) -> Result<(), Exited> {
        self.access(addr, data.len(), true, |page_off, n, offset, bytes| {
            bytes[page_off..page_off + n].copy_from_slice(&data[offset..offset + n]);
        })
    }

    pub fn read_u32(&mut self, addr: usize) -> Result<u32, Exited> {
        let mut raw = [0u8; WORD_SIZE];
        self.read_bytes(addr, &mut raw)?;
        Ok(little_endian::U32::read_from_bytes(&raw)
            .expect("word-sized buffer")
            .get())
    }

    pub fn write_u32(&mut self, addr: usize, value: u32) -> Result<(), Exited> {
        let word = little_endian::U32::new(value);
        self.write_bytes(addr, word.as_bytes())
    }

    /// Push one word onto the user stack.
    pub fn push_u32(&mut self, value: u32) -> Result<(), Exited> {
        self.esp -= WORD_SIZE;
        let esp = self.esp;
        self.write_u32(esp, value)
    }

    /// Trap into the kernel: push the arguments and the syscall number the
    /// way the user-side library would, then enter the gate.
    pub fn syscall(&mut self, nr: u32, args: &[u32]) -> Result<u32, Exited> {
        if self.exit_status.is_some() {
            return Err(Exited);
        }
        let saved_esp = self.esp;
        for &arg in args.iter().rev() {
            self.push_u32(arg)?;
        }
        self.push_u32(nr)?;

        let mut frame = TrapFrame {
            esp: self.esp,
            eax: 0,
        };
        match syscall::handle_trap(self.kernel, &self.proc, &mut frame) {
            TrapOutcome::Return(value) => {
                self.esp = saved_esp;
                Ok(value)
            }
            TrapOutcome::Terminated(status) => {
                self.exit_status = Some(status);
                Err(Exited)
            }
        }
    }

    /// Page-by-page user access through the page directory, faulting in
    /// pages as the hardware would.
    fn access(
        &mut self,
        addr: usize,
        len: usize,
        write: bool,
        mut per_page: impl FnMut(usize, usize, usize, &mut [u8; PAGE_SIZE]),
    ) -> Result<(), Exited> {
        if self.exit_status.is_some() {
            return Err(Exited);
        }
        let mut done = 0;
        while done < len {
            let cur = addr + done;
            let upage = VirtPage::containing(cur);
            let page_off = cur - upage.start();
            let n = (PAGE_SIZE - page_off).min(len - done);

            let result = self
                .proc
                .pagedir()
                .with_page(self.kernel.frames.pool(), upage, write, |bytes| {
                    per_page(page_off, n, done, bytes)
                });

            match result {
                Ok(()) => done += n,
                Err(PdMiss::NotMapped | PdMiss::ReadOnly) => {
                    if page::handle_page_fault(self.kernel, &self.proc, cur, write, self.esp) {
                        continue; // retry the access
                    }
                    process::terminate(self.kernel, &self.proc, -1);
                    self.exit_status = Some(-1);
                    return Err(Exited);
                }
            }
        }
        Ok(())
    }
}
