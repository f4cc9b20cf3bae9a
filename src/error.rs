// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WrapBufError {
    #[error("requested {requested} elems exceeds per-operation maximum {max}")]
    OversizeRequest { requested: usize, max: usize },

    #[error("insufficient space: requested {requested} elems, {available} available")]
    NoSpace { requested: usize, available: u64 },

    #[error("timed out waiting for data")]
    Empty,

    #[error("no index record with id {0}")]
    UnknownId(u64),

    #[error("index record {0} has the wrong role for this operation")]
    BadKind(u64),

    #[error("index record {0} is already in use")]
    AlreadyInUse(u64),

    #[error("index record {0} is not in use")]
    NotInUse(u64),

    #[error("buffer length {len} is not a multiple of elem size {elem_size}")]
    UnalignedBuffer { len: usize, elem_size: usize },

    #[error("elem size must be greater than zero")]
    ZeroElemSize,

    #[error("{0} must be at least one")]
    ZeroCount(&'static str),
}

impl WrapBufError {
    /// Conventional POSIX errno for this failure kind.
    pub fn errno(&self) -> i32 {
        match self {
            WrapBufError::OversizeRequest { .. } => libc::EMSGSIZE,
            WrapBufError::NoSpace { .. } => libc::ENOBUFS,
            WrapBufError::Empty => libc::ENOMSG,
            WrapBufError::UnknownId(_) => libc::ENXIO,
            WrapBufError::BadKind(_) => libc::EINVAL,
            WrapBufError::AlreadyInUse(_) | WrapBufError::NotInUse(_) => libc::EBUSY,
            WrapBufError::UnalignedBuffer { .. } => libc::EINVAL,
            WrapBufError::ZeroElemSize | WrapBufError::ZeroCount(_) => libc::EINVAL,
        }
    }
}
