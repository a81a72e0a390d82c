// SPDX-License-Identifier: MPL-2.0

//! Post-processing filters attached to the video output
//!
//! The owner thread edits a [`FilterList`]; the render thread keeps the
//! instantiated runnables in a [`FilterChain`] and merges list changes into it
//! at a sync point. Removals are tombstoned (`destroy`) and only erased once
//! the render thread has observed them, so a paint pass never runs a filter
//! whose owner is tearing it down.

use crate::errors::{VideoError, VideoResult};
use crate::gpu::{GraphicsContext, TextureId};
use crate::texture::materializer::{FrameMaterializer, MapMode, MappedFrame};
use crate::types::Size;
use image::RgbaImage;
use std::sync::Arc;
use tracing::{debug, warn};

/// A filter attached to the video output
pub trait VideoFilter: Send + Sync {
    /// Instantiate the per-output state that processes frames
    fn create_runnable(&self) -> Box<dyn FilterRunnable>;
}

/// Per-output filter state, run on the render thread for every frame
pub trait FilterRunnable: Send {
    fn run(
        &mut self,
        frame: &mut FilterFrame<'_>,
        format: &SurfaceFormat,
        flags: RunFlags,
    ) -> FilterOutcome;
}

/// What a runnable did with the frame
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Unchanged,
    /// The filter produced a different frame
    Replaced(RgbaImage),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// This runnable is the last one in the chain
    pub last_in_chain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba32,
}

/// Description of the frames handed to filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceFormat {
    pub size: Size,
    pub pixel_format: PixelFormat,
    /// GPU texture holding the frame
    pub texture: Option<TextureId>,
}

/// The current frame as seen by a filter.
///
/// Pixels are materialized lazily: mapping or asking for the image reads the
/// offscreen copy back from the GPU once per frame.
pub struct FilterFrame<'a> {
    materializer: &'a FrameMaterializer,
    ctx: &'a mut dyn GraphicsContext,
    size: Size,
}

impl<'a> FilterFrame<'a> {
    pub fn new(
        materializer: &'a FrameMaterializer,
        ctx: &'a mut dyn GraphicsContext,
        size: Size,
    ) -> Self {
        Self {
            materializer,
            ctx,
            size,
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn texture_id(&self) -> Option<TextureId> {
        self.materializer.texture_id()
    }

    /// Map the frame for reading
    pub fn map(&mut self) -> Option<MappedFrame> {
        self.materializer.map(&mut *self.ctx, MapMode::ReadOnly)
    }

    pub fn unmap(&mut self) {
        self.materializer.unmap();
    }

    /// CPU copy of the frame
    pub fn image(&mut self) -> Option<Arc<RgbaImage>> {
        self.materializer.to_image(&mut *self.ctx)
    }
}

/// Owner-side record of an attached filter
#[derive(Clone)]
pub struct FilterEntry {
    filter: Arc<dyn VideoFilter>,
    /// A runnable must be (re)created at the next sync
    create: bool,
    /// Removed by the owner; erased once a sync has observed it
    destroy: bool,
    /// A sync has instantiated a runnable for this entry
    created: bool,
}

impl FilterEntry {
    fn new(filter: Arc<dyn VideoFilter>) -> Self {
        Self {
            filter,
            create: true,
            destroy: false,
            created: false,
        }
    }

    pub fn filter(&self) -> &Arc<dyn VideoFilter> {
        &self.filter
    }

    /// A runnable will be (re)created at the next sync
    pub fn needs_create(&self) -> bool {
        self.create
    }

    /// Removed, waiting for a sync to erase it
    pub fn is_destroyed(&self) -> bool {
        self.destroy
    }

    /// A runnable exists for this entry
    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl std::fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEntry")
            .field("filter", &filter_addr(&self.filter))
            .field("create", &self.create)
            .field("destroy", &self.destroy)
            .field("created", &self.created)
            .finish()
    }
}

fn filter_addr(filter: &Arc<dyn VideoFilter>) -> *const () {
    Arc::as_ptr(filter) as *const ()
}

/// Filters are identified by the allocation they live in
pub fn same_filter(a: &Arc<dyn VideoFilter>, b: &Arc<dyn VideoFilter>) -> bool {
    filter_addr(a) == filter_addr(b)
}

/// Ordered filter list edited by the owning item
#[derive(Debug, Default, Clone)]
pub struct FilterList {
    entries: Vec<FilterEntry>,
}

impl FilterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[FilterEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append a filter, or move an already listed one to the end.
    ///
    /// A filter that was removed but not yet synced is revived: its pending
    /// destruction turns into a request to recreate the runnable, because the
    /// allocation may now be a different object at the same address.
    pub fn append(&mut self, filter: Arc<dyn VideoFilter>) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|entry| same_filter(&entry.filter, &filter))
        {
            let entry = &mut self.entries[pos];
            entry.create = entry.destroy;
            self.entries[pos..].rotate_left(1);
            return;
        }
        self.entries.push(FilterEntry::new(filter));
    }

    /// Remove every filter. Entries that already have a runnable are only
    /// marked, the render thread erases them.
    pub fn clear(&mut self) {
        self.entries.retain_mut(|entry| {
            if entry.created {
                entry.destroy = true;
                true
            } else {
                false
            }
        });
    }

    /// Drop entries pending destruction without syncing a chain
    pub fn erase_destroyed(&mut self) {
        self.entries.retain(|entry| !entry.destroy);
    }
}

struct ActiveFilter {
    filter: Arc<dyn VideoFilter>,
    runnable: Box<dyn FilterRunnable>,
}

/// Instantiated runnables, owned by the render side
#[derive(Default)]
pub struct FilterChain {
    active: Vec<ActiveFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Merge the owner's list into the active chain.
    ///
    /// Entries flagged `create` get a fresh runnable (this wins over a pending
    /// `destroy`), live entries keep theirs, and destroyed entries are erased
    /// from the list. Runnables whose entry disappeared are dropped.
    pub fn sync(&mut self, list: &mut FilterList) {
        let mut existing = std::mem::take(&mut self.active);

        list.entries.retain_mut(|entry| {
            if entry.create {
                entry.create = false;
                entry.destroy = false;
                entry.created = true;
                self.active.push(ActiveFilter {
                    filter: Arc::clone(&entry.filter),
                    runnable: entry.filter.create_runnable(),
                });
                true
            } else if !entry.destroy {
                let reused = existing
                    .iter()
                    .position(|active| same_filter(&active.filter, &entry.filter))
                    .map(|pos| existing.remove(pos));
                let active = reused.unwrap_or_else(|| {
                    entry.created = true;
                    ActiveFilter {
                        filter: Arc::clone(&entry.filter),
                        runnable: entry.filter.create_runnable(),
                    }
                });
                self.active.push(active);
                true
            } else {
                false
            }
        });

        debug!(
            active = self.active.len(),
            dropped = existing.len(),
            "Filter chain synced"
        );
    }

    /// Run every runnable on the materialized frame.
    ///
    /// Replacement frames cannot be written back to the display path: the
    /// original frame keeps being shown and passed down the chain, and the first
    /// offending filter is reported.
    pub fn run(
        &mut self,
        materializer: &FrameMaterializer,
        ctx: &mut dyn GraphicsContext,
        size: Size,
    ) -> VideoResult<()> {
        if self.active.is_empty() {
            return Ok(());
        }

        let format = SurfaceFormat {
            size,
            pixel_format: PixelFormat::Rgba32,
            texture: materializer.texture_id(),
        };
        let mut frame = FilterFrame::new(materializer, ctx, size);
        let last = self.active.len() - 1;
        let mut mutated = None;

        for (index, active) in self.active.iter_mut().enumerate() {
            let flags = RunFlags {
                last_in_chain: index == last,
            };
            if let FilterOutcome::Replaced(_) = active.runnable.run(&mut frame, &format, flags) {
                mutated.get_or_insert(index);
            }
        }

        match mutated {
            Some(filter_index) => {
                warn!(filter_index, "Filter replaced the frame, keeping the original");
                Err(VideoError::UnsupportedFilterMutation { filter_index })
            }
            None => Ok(()),
        }
    }
}
