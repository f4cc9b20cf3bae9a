use crate::error::WrapBufError;
use crate::layout::Layout;
use crate::memory::Memory;
use crate::wrap_trace;
use eyre::Result;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Default)]
struct CopyState {
    write_index: u64,
    read_index: u64,
}

/// Single-producer/single-consumer channel that memcpys records in and out.
/// `write` never blocks; `read` waits on a condition variable up to the
/// caller's timeout. The SPSC discipline is by convention, not enforced.
pub struct CopyChannel {
    layout: Layout,
    memory: Memory,
    state: Mutex<CopyState>,
    data_ready: Condvar,
}

impl CopyChannel {
    pub fn new(
        elem_size: usize,
        max_elems_per_write: usize,
        max_elems_per_read: usize,
        slack: usize,
    ) -> Result<Self> {
        let layout = Layout::new(elem_size, max_elems_per_write, max_elems_per_read, slack)?;
        let memory = Memory::new(layout.region_bytes(), layout.overlap_bytes())?;
        debug!(
            region_bytes = layout.region_bytes(),
            num_elems = layout.num_elems(),
            "copy channel ready"
        );
        Ok(CopyChannel {
            layout,
            memory,
            state: Mutex::new(CopyState::default()),
            data_ready: Condvar::new(),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn num_elems(&self) -> usize {
        self.layout.num_elems()
    }

    pub fn region_bytes(&self) -> usize {
        self.layout.region_bytes()
    }

    pub fn elem_size(&self) -> usize {
        self.layout.elem_size()
    }

    pub fn max_elems_per_write(&self) -> usize {
        self.layout.max_elems_per_write()
    }

    pub fn max_elems_per_read(&self) -> usize {
        self.layout.max_elems_per_read()
    }

    pub fn write_index(&self) -> u64 {
        self.state.lock().write_index
    }

    pub fn read_index(&self) -> u64 {
        self.state.lock().read_index
    }

    pub fn write(&self, src: &[u8]) -> Result<(), WrapBufError> {
        let elem_size = self.layout.elem_size();
        if src.len() % elem_size != 0 {
            return Err(WrapBufError::UnalignedBuffer {
                len: src.len(),
                elem_size,
            });
        }
        let elems = src.len() / elem_size;
        if elems > self.layout.max_elems_per_write() {
            error!(
                requested = elems,
                max = self.layout.max_elems_per_write(),
                "requested too many elems this write"
            );
            return Err(WrapBufError::OversizeRequest {
                requested: elems,
                max: self.layout.max_elems_per_write(),
            });
        }

        let mut state = self.state.lock();
        let num_elems = self.layout.num_elems() as u64;
        let used = state.write_index - state.read_index;
        if used + elems as u64 > num_elems {
            warn!(
                requested = elems,
                available = num_elems - used,
                "insufficient slack"
            );
            return Err(WrapBufError::NoSpace {
                requested: elems,
                available: num_elems - used,
            });
        }

        let offset = self.layout.byte_offset(state.write_index);
        wrap_trace!(
            from_elem = state.write_index,
            to_elem = state.write_index + elems as u64,
            byte_offset = offset,
            len = src.len(),
            "copying elems in"
        );
        // May run past region_bytes; the overlap view absorbs the excess.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.memory.as_ptr().as_ptr().add(offset),
                src.len(),
            );
        }
        state.write_index += elems as u64;
        self.data_ready.notify_one();
        Ok(())
    }

    pub fn read(
        &self,
        dst: &mut [u8],
        timeout: Duration,
        advance: Option<u64>,
    ) -> Result<(), WrapBufError> {
        let elem_size = self.layout.elem_size();
        if dst.len() % elem_size != 0 {
            return Err(WrapBufError::UnalignedBuffer {
                len: dst.len(),
                elem_size,
            });
        }
        let elems = dst.len() / elem_size;
        if elems > self.layout.max_elems_per_read() {
            error!(
                requested = elems,
                max = self.layout.max_elems_per_read(),
                "requested too many elems this read"
            );
            return Err(WrapBufError::OversizeRequest {
                requested: elems,
                max: self.layout.max_elems_per_read(),
            });
        }

        let mut state = self.state.lock();
        // Each wait gets the full timeout again; a spurious wake extends
        // the deadline.
        while state.read_index + elems as u64 > state.write_index {
            if self.data_ready.wait_for(&mut state, timeout).timed_out() {
                debug!(timeout_us = timeout.as_micros() as u64, "timeout");
                return Err(WrapBufError::Empty);
            }
        }

        let offset = self.layout.byte_offset(state.read_index);
        wrap_trace!(
            from_elem = state.read_index,
            to_elem = state.read_index + elems as u64,
            byte_offset = offset,
            len = dst.len(),
            "copying elems out"
        );
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.memory.as_ptr().as_ptr().add(offset),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
        state.read_index += advance.unwrap_or(elems as u64);
        Ok(())
    }

    // Testing backdoor; offsets up to region_bytes + overlap_bytes are
    // mapped.
    pub fn direct(&self, byte_offset: usize) -> *mut u8 {
        let _state = self.state.lock();
        unsafe { self.memory.as_ptr().as_ptr().add(byte_offset) }
    }
}
