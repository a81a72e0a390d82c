// SPDX-License-Identifier: MPL-2.0

//! Native frame buffers and the memory they wrap
//!
//! A [`NativeBuffer`] is the reference-counted frame object handed over by the
//! producer. Texture caching keys on the identity of the buffer's underlying
//! memory ([`MemoryId`]), not on the buffer wrapper: pooled or looping producers
//! hand out fresh wrappers around the same memory.

use std::any::Any;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Opaque, comparable identity of a native memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoryId(usize);

impl MemoryId {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

/// First plane of a dmabuf, as passed to `eglCreateImageKHR`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBufPlane {
    pub fd: RawFd,
    /// Byte offset of the plane inside the dmabuf
    pub offset: usize,
}

/// Memory that can back a GPU external image.
///
/// GPU backends import [`NativeMemory::dmabuf`] zero-copy. The software
/// backend reads the bytes instead.
pub trait NativeMemory: Send + Sync + fmt::Debug + 'static {
    /// Identity of the underlying memory region
    fn identity(&self) -> MemoryId;

    /// Copy of the memory contents, if it is CPU-mappable
    fn read_bytes(&self) -> Option<Vec<u8>>;

    /// The dmabuf behind this memory, if any
    fn dmabuf(&self) -> Option<DmaBufPlane> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to native memory.
///
/// Cloning takes a reference; dropping the last clone releases the memory.
#[derive(Clone)]
pub struct MemoryHandle {
    inner: Arc<dyn NativeMemory>,
}

impl MemoryHandle {
    pub fn new(memory: impl NativeMemory) -> Self {
        Self {
            inner: Arc::new(memory),
        }
    }

    pub fn id(&self) -> MemoryId {
        self.inner.identity()
    }

    pub fn memory(&self) -> &dyn NativeMemory {
        self.inner.as_ref()
    }

    /// Number of live references to this handle's allocation
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHandle").field("id", &self.id()).finish()
    }
}

/// Plain system memory holding tightly packed RGBA pixels
#[derive(Debug)]
pub struct HostMemory {
    bytes: Arc<[u8]>,
}

impl HostMemory {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Memory filled with a single RGBA color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let bytes: Vec<u8> = rgba.iter().copied().cycle().take(pixels * 4).collect();
        Self::new(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl NativeMemory for HostMemory {
    // The allocation carries the reference counts, so even empty memory gets
    // its own address
    fn identity(&self) -> MemoryId {
        MemoryId(Arc::as_ptr(&self.bytes) as *const u8 as usize)
    }

    fn read_bytes(&self) -> Option<Vec<u8>> {
        Some(self.bytes.to_vec())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl NativeMemory for gstreamer::Memory {
    fn identity(&self) -> MemoryId {
        MemoryId(self.as_ptr() as usize)
    }

    fn read_bytes(&self) -> Option<Vec<u8>> {
        self.map_readable().ok().map(|map| map.as_slice().to_vec())
    }

    fn dmabuf(&self) -> Option<DmaBufPlane> {
        let memory = self.downcast_memory_ref::<gstreamer_allocators::DmaBufMemory>()?;
        Some(DmaBufPlane {
            fd: memory.fd(),
            offset: self.offset(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decoder crop rectangle in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

struct BufferInner {
    memory: Option<MemoryHandle>,
    crop: Option<CropRect>,
    pts: Option<u64>,
    // Keeps the producer-side buffer (and its pool slot) alive as long as we hold it
    _source: Option<Box<dyn Any + Send + Sync>>,
}

/// Reference-counted frame delivered by the producer
#[derive(Clone)]
pub struct NativeBuffer {
    inner: Arc<BufferInner>,
}

impl NativeBuffer {
    pub fn new(memory: Option<MemoryHandle>, crop: Option<CropRect>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                memory,
                crop,
                pts: None,
                _source: None,
            }),
        }
    }

    /// Wrap a GStreamer buffer: its first memory and its crop meta, if any
    pub fn from_gst(buffer: &gstreamer::Buffer) -> Self {
        let memory = (buffer.n_memory() > 0)
            .then(|| MemoryHandle::new(buffer.peek_memory(0).to_owned()));
        let crop = buffer
            .meta::<gstreamer_video::VideoCropMeta>()
            .map(|meta| {
                let (x, y, width, height) = meta.rect();
                CropRect::new(x, y, width, height)
            });
        Self {
            inner: Arc::new(BufferInner {
                memory,
                crop,
                pts: buffer.pts().map(|pts| pts.nseconds()),
                _source: Some(Box::new(buffer.clone())),
            }),
        }
    }

    pub fn memory(&self) -> Option<&MemoryHandle> {
        self.inner.memory.as_ref()
    }

    pub fn crop(&self) -> Option<CropRect> {
        self.inner.crop
    }

    /// Presentation timestamp in nanoseconds
    pub fn pts(&self) -> Option<u64> {
        self.inner.pts
    }

    /// Same buffer wrapper (not merely the same memory)
    pub fn ptr_eq(&self, other: &NativeBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live references to this buffer
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("memory", &self.inner.memory)
            .field("crop", &self.inner.crop)
            .field("pts", &self.inner.pts)
            .finish()
    }
}
