// SPDX-License-Identifier: MPL-2.0

//! Video Texture - zero-copy video frames as GPU textures
//!
//! This library takes native frames produced by a GStreamer pipeline and shows
//! them inside a retained-mode scene graph without copying pixels on the CPU.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backend`]: Producer/render thread hand-off and the GStreamer sink bridge
//! - [`texture`]: Texture cache keyed by buffer memory, and CPU frame materialization
//! - [`scene`]: Render node, quad geometry and the video material
//! - [`filters`]: Post-processing filter lifecycle
//! - [`media`]: Native buffers and stream metadata
//! - [`gpu`]: The graphics context seam with OpenGL ES (EGL image) and software implementations
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let backend = VideoTextureBackend::new(Config::load()?);
//! let sink = TextureSink::new(backend.frame_sink())?;
//! // link sink.element() into a pipeline, then per paint pass:
//! node = backend.update_paint_node(node, &mut ctx, bounds);
//! ```

pub mod backend;
pub mod config;
pub mod constants;
pub mod errors;
pub mod filters;
pub mod gpu;
pub mod media;
pub mod scene;
pub mod texture;
pub mod types;

// Re-export commonly used types
pub use backend::{FrameSink, ItemEvent, ProducerEvent, TextureSink, VideoItem, VideoTextureBackend};
pub use config::Config;
pub use errors::{VideoError, VideoResult};
pub use gpu::{GlContext, GraphicsContext, SoftwareContext};
pub use media::{NativeBuffer, Orientation, StreamEvent};
pub use scene::{PreprocessNode, VideoNode};
pub use texture::{FrameMaterializer, SubRect, VideoTexture};
pub use types::{Rect, Size};
