use crate::error::WrapBufError;
use crate::layout::Layout;
use crate::memory::Memory;
use crate::wrap_trace;
use core::ptr::NonNull;
use eyre::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info};

// An id naming the wrong role reports BadKind instead of UnknownId.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    Writer,
    Reader,
}

// A claimed span of the buffer, start..end in monotonic element indices.
#[derive(Debug, Clone)]
struct IndexRecord {
    id: u64,
    start: u64,
    end: u64,
    kind: RecordKind,
    in_use: bool,
    has_grabbed: bool,
}

impl IndexRecord {
    fn new(id: u64, kind: RecordKind) -> Self {
        IndexRecord {
            id,
            start: 0,
            end: 0,
            kind,
            in_use: false,
            has_grabbed: false,
        }
    }
}

struct DirectState {
    write: IndexRecord,
    readers: BTreeMap<u64, IndexRecord>,
    next_id: u64,
    min_read_index: u64,
    max_read_index: u64,
}

impl DirectState {
    // Everything below this index is published and safe to hand to readers.
    fn min_write_index(&self) -> u64 {
        if self.write.in_use {
            self.write.start
        } else {
            self.write.end
        }
    }

    // Lowest read progress point across the table; bounds the writer.
    // Readers that have never grabbed hold no claim below the shared cursor.
    fn fold_min_read(&self, seed: u64) -> u64 {
        let mut min = seed;
        for record in self.readers.values() {
            let bound = if record.in_use {
                record.start
            } else if record.has_grabbed {
                record.end
            } else {
                self.max_read_index
            };
            min = min.min(bound);
        }
        min
    }
}

/// Single-producer/multi-reader channel handing out raw pointers into the
/// mapped region via grab/release pairs. Readers compete for data: each
/// element is claimed by exactly one reader. A pointer returned by a grab is
/// valid for the claimed span's byte length until the matching release;
/// dereferencing it is the caller's `unsafe` obligation.
pub struct DirectChannel {
    layout: Layout,
    memory: Memory,
    state: Mutex<DirectState>,
    data_ready: Condvar,
}

impl DirectChannel {
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
            "direct channel ready"
        );
        Ok(DirectChannel {
            layout,
            memory,
            state: Mutex::new(DirectState {
                write: IndexRecord::new(0, RecordKind::Writer),
                readers: BTreeMap::new(),
                next_id: 1,
                min_read_index: 0,
                max_read_index: 0,
            }),
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

    pub fn min_read_index(&self) -> u64 {
        self.state.lock().min_read_index
    }

    pub fn max_read_index(&self) -> u64 {
        self.state.lock().max_read_index
    }

    pub fn elems_available_to_read(&self) -> u64 {
        let state = self.state.lock();
        state.min_write_index() - state.max_read_index
    }

    pub fn add_reader(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state
            .readers
            .insert(id, IndexRecord::new(id, RecordKind::Reader));
        info!(
            id,
            readers = state.readers.len(),
            next_id = state.next_id,
            "added reader"
        );
        id
    }

    pub fn remove_reader(&self, id: u64) -> Result<(), WrapBufError> {
        let mut state = self.state.lock();
        if id == state.write.id {
            return Err(WrapBufError::BadKind(id));
        }
        match state.readers.get(&id) {
            None => return Err(WrapBufError::UnknownId(id)),
            Some(record) if record.in_use => return Err(WrapBufError::AlreadyInUse(id)),
            Some(_) => {}
        }
        state.readers.remove(&id);
        state.min_read_index = state.fold_min_read(state.max_read_index);
        info!(id, readers = state.readers.len(), "removed reader");
        Ok(())
    }

    pub fn grab_write(&self, elems: usize) -> Result<NonNull<u8>, WrapBufError> {
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
        if state.write.in_use {
            return Err(WrapBufError::AlreadyInUse(state.write.id));
        }
        let space = self.layout.num_elems() as u64 - (state.write.end - state.min_read_index);
        if elems as u64 > space {
            return Err(WrapBufError::NoSpace {
                requested: elems,
                available: space,
            });
        }

        state.write.start = state.write.end;
        state.write.end += elems as u64;
        state.write.in_use = true;
        let offset = self.layout.byte_offset(state.write.start);
        wrap_trace!(
            from_elem = state.write.start,
            to_elem = state.write.end,
            byte_offset = offset,
            "write grab"
        );
        Ok(unsafe { NonNull::new_unchecked(self.memory.as_ptr().as_ptr().add(offset)) })
    }

    pub fn release_write(&self) -> Result<(), WrapBufError> {
        let mut state = self.state.lock();
        if !state.write.in_use {
            return Err(WrapBufError::NotInUse(state.write.id));
        }
        state.write.in_use = false;
        wrap_trace!(published_to = state.write.end, "write release");
        self.data_ready.notify_all();
        Ok(())
    }

    pub fn grab_read(
        &self,
        id: u64,
        elems: usize,
        timeout: Duration,
    ) -> Result<NonNull<u8>, WrapBufError> {
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
        if id == state.write.id {
            return Err(WrapBufError::BadKind(id));
        }
        match state.readers.get(&id) {
            None => return Err(WrapBufError::UnknownId(id)),
            Some(record) if record.kind != RecordKind::Reader => {
                return Err(WrapBufError::BadKind(id))
            }
            Some(record) if record.in_use => return Err(WrapBufError::AlreadyInUse(id)),
            Some(_) => {}
        }

        while (elems as u64) > state.min_write_index() - state.max_read_index {
            if self.data_ready.wait_for(&mut state, timeout).timed_out() {
                debug!(id, timeout_us = timeout.as_micros() as u64, "timeout");
                return Err(WrapBufError::Empty);
            }
        }

        // The lock is released while waiting; the record may have been
        // removed or grabbed through another handle in the meantime.
        let start = state.max_read_index;
        let end = start + elems as u64;
        match state.readers.get_mut(&id) {
            None => return Err(WrapBufError::UnknownId(id)),
            Some(record) if record.in_use => return Err(WrapBufError::AlreadyInUse(id)),
            Some(record) => {
                record.in_use = true;
                record.has_grabbed = true;
                record.start = start;
                record.end = end;
            }
        }
        state.max_read_index = end;

        let offset = self.layout.byte_offset(start);
        wrap_trace!(
            id,
            from_elem = start,
            to_elem = end,
            byte_offset = offset,
            "read grab"
        );
        Ok(unsafe { NonNull::new_unchecked(self.memory.as_ptr().as_ptr().add(offset)) })
    }

    pub fn release_read(&self, id: u64) -> Result<(), WrapBufError> {
        let mut state = self.state.lock();
        if id == state.write.id {
            return Err(WrapBufError::BadKind(id));
        }
        let end = match state.readers.get_mut(&id) {
            None => return Err(WrapBufError::UnknownId(id)),
            Some(record) if record.kind != RecordKind::Reader => {
                return Err(WrapBufError::BadKind(id))
            }
            Some(record) if !record.in_use => return Err(WrapBufError::NotInUse(id)),
            Some(record) => {
                record.in_use = false;
                record.end
            }
        };
        state.min_read_index = state.fold_min_read(end);
        wrap_trace!(id, min_read_index = state.min_read_index, "read release");
        Ok(())
    }

    // Testing backdoor; offsets up to region_bytes + overlap_bytes are
    // mapped.
    pub fn direct(&self, byte_offset: usize) -> *mut u8 {
        let _state = self.state.lock();
        unsafe { self.memory.as_ptr().as_ptr().add(byte_offset) }
    }
}
