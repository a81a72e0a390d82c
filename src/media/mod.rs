// SPDX-License-Identifier: MPL-2.0

//! Producer-side media model: native buffers and stream metadata

pub mod buffer;
pub mod stream;

pub use buffer::{
    CropRect, DmaBufPlane, HostMemory, MemoryHandle, MemoryId, NativeBuffer, NativeMemory,
};
pub use stream::{Orientation, StreamEvent};
