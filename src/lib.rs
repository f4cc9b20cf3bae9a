//! Virtually-contiguous ring buffer channels for fixed-size records.
//!
//! The backing region is mapped twice: the pages just past the logical end
//! of the buffer alias its start, so a read or write that would straddle the
//! wrap point is a single contiguous span of virtual memory. On top of that
//! mapping sit two channels: [`CopyChannel`], a single-producer/
//! single-consumer channel that memcpys records in and out, and
//! [`DirectChannel`], a single-producer/multi-reader channel whose callers
//! grab raw pointers into the buffer and release them when done.
//!
//! Linux only (`mmap` + `memfd`). Diagnostics are emitted as `tracing`
//! events; per-operation data-plane logs compile in with the `trace`
//! feature.

pub mod copy;
pub mod direct;
pub mod error;
pub mod layout;
pub mod memory;
mod trace_macro;

pub use copy::CopyChannel;
pub use direct::DirectChannel;
pub use error::WrapBufError;
pub use layout::Layout;
pub use memory::Memory;

pub use eyre::Result;
