use crate::error::WrapBufError;
use eyre::{ensure, Result};
use tracing::debug;

/// Sizing parameters and the derived region geometry. The region holds
/// `slack * max_elems_per_read + max_elems_per_write` elements rounded up to
/// a page multiple with headroom; the overlap is the shadow span past the
/// region end that absorbs a single wrapped read or write.
#[derive(Debug, Clone)]
pub struct Layout {
    elem_size: usize,
    max_elems_per_write: usize,
    max_elems_per_read: usize,
    slack: usize,
    page_size: usize,
    region_bytes: usize,
    overlap_bytes: usize,
    num_elems: usize,
}

impl Layout {
    pub fn new(
        elem_size: usize,
        max_elems_per_write: usize,
        max_elems_per_read: usize,
        slack: usize,
    ) -> Result<Self> {
        ensure!(elem_size > 0, WrapBufError::ZeroElemSize);
        ensure!(
            max_elems_per_write > 0,
            WrapBufError::ZeroCount("max_elems_per_write")
        );
        ensure!(
            max_elems_per_read > 0,
            WrapBufError::ZeroCount("max_elems_per_read")
        );
        ensure!(slack > 0, WrapBufError::ZeroCount("slack"));

        let page_size = page_size();
        let min_region_bytes = (slack * max_elems_per_read + max_elems_per_write) * elem_size;
        // Rounds up and always adds one page, even when already aligned.
        let region_bytes = (min_region_bytes / page_size + 1) * page_size;
        let num_elems = region_bytes / elem_size;
        let overlap_bytes =
            (max_elems_per_read.max(max_elems_per_write) * elem_size / page_size + 1) * page_size;

        debug!(
            min_region_bytes,
            page_size, region_bytes, num_elems, overlap_bytes, "computed region layout"
        );

        // With slack >= 1 the backing object always covers the overlap view.
        debug_assert!(overlap_bytes <= region_bytes);

        Ok(Layout {
            elem_size,
            max_elems_per_write,
            max_elems_per_read,
            slack,
            page_size,
            region_bytes,
            overlap_bytes,
            num_elems,
        })
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn max_elems_per_write(&self) -> usize {
        self.max_elems_per_write
    }

    pub fn max_elems_per_read(&self) -> usize {
        self.max_elems_per_read
    }

    pub fn slack(&self) -> usize {
        self.slack
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn region_bytes(&self) -> usize {
        self.region_bytes
    }

    pub fn overlap_bytes(&self) -> usize {
        self.overlap_bytes
    }

    // Trailing bytes past num_elems * elem_size are never addressed.
    pub fn num_elems(&self) -> usize {
        self.num_elems
    }

    pub(crate) fn byte_offset(&self, index: u64) -> usize {
        (index as usize).wrapping_mul(self.elem_size) % self.region_bytes
    }
}

pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
