// SPDX-License-Identifier: MPL-2.0

//! Cross-thread orchestration between the producer and the render thread
//!
//! Three parties talk to the backend:
//!
//! - the producer (a GStreamer streaming thread) posts [`ProducerEvent`]s through a
//!   [`FrameSink`]; it only ever swaps a buffer or sets a flag under the lock
//! - the render thread calls [`VideoTextureBackend::update_paint_node`] once per
//!   paint pass and owns every GPU resource through the returned [`VideoNode`]
//! - the item thread drains [`ItemEvent`]s with
//!   [`VideoTextureBackend::dispatch_item_events`] so size changes are only applied
//!   to the item from its own thread
//!
//! Hand-off is "latest queued wins": a producer never waits for a paint, and a
//! paint never waits for the producer.

pub mod gst_sink;

pub use gst_sink::TextureSink;

use crate::config::Config;
use crate::filters::{FilterList, VideoFilter};
use crate::gpu::GraphicsContext;
use crate::media::{NativeBuffer, Orientation, StreamEvent};
use crate::scene::{VideoNode, mirror_axes};
use crate::types::{Rect, Size};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace};

/// Inbound event from the producer side
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// A new frame to show; `None` clears the output
    Buffer(Option<NativeBuffer>),
    /// The producer recycled its buffer pool
    BuffersInvalidated,
    /// Metadata observed on the stream
    Stream(StreamEvent),
}

/// Update posted to the item thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEvent {
    /// Schedule a repaint
    Repaint,
    /// The displayed size changed; carries the implicit size, already transposed
    /// for the stream orientation
    Resize(Size),
    /// Geometry changed without a size change
    UpdateRequest,
}

/// The host item the backend renders into. Only called from the item thread.
pub trait VideoItem {
    fn set_implicit_size(&mut self, size: Size);
    /// Schedule a repaint of the item
    fn update(&mut self);
    fn native_size_changed(&mut self, size: Size);
}

#[derive(Debug, Default)]
struct BackendState {
    queued: Option<NativeBuffer>,
    current: Option<NativeBuffer>,
    /// Size of the decoded frames
    texture_size: Size,
    /// Display size, as applied on the item thread
    native_size: Size,
    /// Frame size corrected for the pixel aspect ratio
    implicit_size: Size,
    /// The item's own orientation in degrees
    orientation: i32,
    texture_orientation: Orientation,
    mirror: bool,
    geometry_changed: bool,
    filters_changed: bool,
    buffers_invalidated: bool,
    filters: FilterList,
}

struct Shared {
    state: Mutex<BackendState>,
    item_events: UnboundedSender<ItemEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BackendState> {
        // A panic on another thread must not wedge the render loop
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn post_item_event(&self, event: ItemEvent) {
        if self.item_events.send(event).is_err() {
            trace!(?event, "Item event dropped, backend is gone");
        }
    }
}

/// Producer-side handle. Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    /// Single inbound entry point for the producer
    pub fn post(&self, event: ProducerEvent) {
        match event {
            ProducerEvent::Buffer(buffer) => self.show_frame(buffer),
            ProducerEvent::BuffersInvalidated => {
                self.shared.lock().buffers_invalidated = true;
                self.shared.post_item_event(ItemEvent::Repaint);
            }
            ProducerEvent::Stream(event) => self.stream_event(event),
        }
    }

    pub fn deliver_buffer(&self, buffer: NativeBuffer) {
        self.post(ProducerEvent::Buffer(Some(buffer)));
    }

    pub fn notify_buffers_invalidated(&self) {
        self.post(ProducerEvent::BuffersInvalidated);
    }

    fn show_frame(&self, buffer: Option<NativeBuffer>) {
        let replaced = {
            let mut state = self.shared.lock();
            std::mem::replace(&mut state.queued, buffer)
        };
        // Release the previous frame outside the lock
        drop(replaced);
        self.shared.post_item_event(ItemEvent::Repaint);
    }

    fn stream_event(&self, event: StreamEvent) {
        let mut state = self.shared.lock();

        let mut implicit_size = state.implicit_size;
        let mut orientation = state.texture_orientation;
        let mut geometry_changed = false;

        match event {
            StreamEvent::Caps { size, pixel_aspect } => {
                implicit_size = StreamEvent::display_size(size, pixel_aspect);
                state.texture_size = size;
                geometry_changed = true;
            }
            StreamEvent::Tags {
                orientation: Some(tagged),
            } => orientation = tagged,
            StreamEvent::Tags { orientation: None } => {}
            StreamEvent::StreamStart => orientation = Orientation::None,
        }

        if state.texture_orientation != orientation || state.implicit_size != implicit_size {
            state.implicit_size = implicit_size;
            state.texture_orientation = orientation;
            state.geometry_changed = true;
            drop(state);

            let posted = if orientation.is_transposed() {
                implicit_size.transposed()
            } else {
                implicit_size
            };
            debug!(size = %posted, ?orientation, "Stream geometry changed");
            self.shared.post_item_event(ItemEvent::Resize(posted));
        } else if geometry_changed {
            state.geometry_changed = true;
            drop(state);
            self.shared.post_item_event(ItemEvent::UpdateRequest);
        }
    }
}

/// Backend driving a [`VideoNode`] from frames posted by a producer
pub struct VideoTextureBackend {
    shared: Arc<Shared>,
    item_events: Mutex<UnboundedReceiver<ItemEvent>>,
    config: Config,
}

impl VideoTextureBackend {
    pub fn new(config: Config) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        info!(retain_textures = config.retain_textures, "Creating video texture backend");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BackendState::default()),
                item_events: sender,
            }),
            item_events: Mutex::new(receiver),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle for the producer thread
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The item's orientation changed (degrees, a multiple of 90)
    pub fn set_orientation(&self, orientation: i32) {
        {
            let mut state = self.shared.lock();
            if state.orientation == orientation {
                return;
            }
            state.orientation = orientation;
            state.geometry_changed = true;
        }
        self.shared.post_item_event(ItemEvent::Repaint);
    }

    /// Mirror the output, e.g. when a front-facing camera became active
    pub fn set_mirror(&self, mirror: bool) {
        {
            let mut state = self.shared.lock();
            if state.mirror == mirror {
                return;
            }
            state.mirror = mirror;
            state.geometry_changed = true;
        }
        self.shared.post_item_event(ItemEvent::Repaint);
    }

    /// The item's bounding rect changed
    pub fn update_geometry(&self) {
        self.shared.lock().geometry_changed = true;
    }

    pub fn native_size(&self) -> Size {
        self.shared.lock().native_size
    }

    /// Stream orientation as last reported by the producer
    pub fn texture_orientation(&self) -> Orientation {
        self.shared.lock().texture_orientation
    }

    /// Area of `bounding_rect` the video covers, keeping the native aspect ratio
    pub fn adjusted_viewport(&self, bounding_rect: Rect) -> Rect {
        bounding_rect.fit(self.native_size())
    }

    pub fn append_filter(&self, filter: Arc<dyn VideoFilter>) {
        let mut state = self.shared.lock();
        state.filters_changed = true;
        state.filters.append(filter);
    }

    pub fn clear_filters(&self) {
        let mut state = self.shared.lock();
        state.filters_changed = true;
        state.filters.clear();
    }

    /// Number of owner-side filter entries, including ones pending removal
    pub fn filter_entries(&self) -> usize {
        self.shared.lock().filters.len()
    }

    /// Apply posted updates to the item. Must run on the item thread.
    ///
    /// Returns the number of events handled.
    pub fn dispatch_item_events(&self, item: &mut dyn VideoItem) -> usize {
        let mut handled = 0;
        loop {
            let next = self
                .item_events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_recv();
            let Ok(event) = next else {
                break;
            };
            handled += 1;
            match event {
                ItemEvent::Repaint | ItemEvent::UpdateRequest => item.update(),
                ItemEvent::Resize(size) => self.apply_resize(item, size),
            }
        }
        handled
    }

    fn apply_resize(&self, item: &mut dyn VideoItem, size: Size) {
        let native_size = {
            let mut state = self.shared.lock();
            if size.is_valid() {
                state.native_size = if state.orientation.rem_euclid(180) != 0 {
                    size.transposed()
                } else {
                    size
                };
            }
            state.native_size
        };
        if size.is_valid() {
            item.set_implicit_size(size);
        }
        item.update();
        item.native_size_changed(native_size);
    }

    /// Build or update the render node for this paint pass. Render thread only.
    ///
    /// Returns `None` (tearing down `old`) while no frame is queued.
    pub fn update_paint_node(
        &self,
        old: Option<VideoNode>,
        ctx: &mut dyn GraphicsContext,
        bounding_rect: Rect,
    ) -> Option<VideoNode> {
        let mut state = self.shared.lock();

        if state.queued.is_none() {
            let current = state.current.take();
            if state.filters_changed {
                state.filters_changed = false;
                state.filters.erase_destroyed();
            }
            drop(state);
            drop(current);

            if let Some(node) = old {
                debug!("No frame queued, destroying video node");
                node.destroy(ctx);
            }
            return None;
        }

        let mut node = match old {
            Some(node) => node,
            None => {
                debug!("Creating video node");
                state.geometry_changed = true;
                state.filters_changed = !state.filters.is_empty();
                VideoNode::new(&self.config)
            }
        };

        node.texture_mut().set_texture_size(state.texture_size);
        node.mark_material_dirty();

        if state.buffers_invalidated {
            state.buffers_invalidated = false;
            node.texture_mut().invalidate_buffers();
        }

        let mut to_release = None;
        let promoted = match (&state.current, &state.queued) {
            (Some(current), Some(queued)) => !current.ptr_eq(queued),
            (None, Some(_)) => true,
            _ => false,
        };
        if promoted {
            let queued = state.queued.clone();
            to_release = std::mem::replace(&mut state.current, queued);
        }

        if state.filters_changed {
            state.filters_changed = false;
            node.texture_mut().sync_filters(&mut state.filters);
        }

        if state.geometry_changed {
            let rect = bounding_rect.fit(state.native_size);
            let texture_orientation = state.texture_orientation.degrees();
            let orientation = (state.orientation - texture_orientation).rem_euclid(360);
            let (horizontal, vertical) = mirror_axes(state.mirror, texture_orientation);
            node.set_bounding_rect(rect, orientation, horizontal, vertical);
            node.mark_geometry_dirty();
            state.geometry_changed = false;
        }

        let current = state.current.clone();
        drop(state);

        node.texture_mut().set_buffer(current);
        drop(to_release);

        Some(node)
    }

    /// Hook run after each rendered frame
    pub fn after_rendering(&self, node: Option<&mut VideoNode>, ctx: &mut dyn GraphicsContext) {
        if self.config.retain_textures {
            return;
        }
        if let Some(node) = node {
            node.texture_mut().reset_textures(ctx);
        }
    }
}

impl Drop for VideoTextureBackend {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        let queued = state.queued.take();
        let current = state.current.take();
        drop(state);
        drop(queued);
        drop(current);
        debug!("Video texture backend dropped");
    }
}
