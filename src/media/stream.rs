// SPDX-License-Identifier: MPL-2.0

//! Stream metadata events and their parsing from GStreamer events

use crate::constants::orientation_tags;
use crate::types::Size;
use gstreamer::EventView;
use tracing::debug;

/// Rotation reported by the stream, clockwise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Orientation {
    #[default]
    None,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Orientation {
    pub fn degrees(self) -> i32 {
        match self {
            Orientation::None => 0,
            Orientation::Rotate90 => 90,
            Orientation::Rotate180 => 180,
            Orientation::Rotate270 => 270,
        }
    }

    /// Parse an image-orientation tag. Anything unrecognised (including the
    /// flip variants) maps to no rotation.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            orientation_tags::ROTATE_90 => Orientation::Rotate90,
            orientation_tags::ROTATE_180 => Orientation::Rotate180,
            orientation_tags::ROTATE_270 => Orientation::Rotate270,
            _ => Orientation::None,
        }
    }

    /// Dimensions swap meaning under this rotation
    pub fn is_transposed(self) -> bool {
        self.degrees() % 180 != 0
    }
}

/// Metadata event observed on the producer side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Negotiated caps
    Caps {
        size: Size,
        /// Pixel aspect ratio as numerator/denominator
        pixel_aspect: Option<(i32, i32)>,
    },
    /// Tag list; `orientation` is `None` when the tags carry no orientation
    Tags { orientation: Option<Orientation> },
    /// A new stream starts; orientation resets
    StreamStart,
}

impl StreamEvent {
    /// Size adjusted for the pixel aspect ratio, for `Caps` events
    pub fn display_size(size: Size, pixel_aspect: Option<(i32, i32)>) -> Size {
        match pixel_aspect {
            Some((num, den)) if den > 0 && num > 0 => Size::new(
                (size.width as i64 * num as i64 / den as i64) as u32,
                size.height,
            ),
            _ => size,
        }
    }

    /// Extract the metadata we care about from a downstream event
    pub fn from_gst(event: &gstreamer::EventRef) -> Option<Self> {
        match event.view() {
            EventView::Caps(caps) => {
                let structure = caps.caps().structure(0)?;
                let width = structure.get::<i32>("width").unwrap_or(0).max(0) as u32;
                let height = structure.get::<i32>("height").unwrap_or(0).max(0) as u32;
                let pixel_aspect = structure
                    .get::<gstreamer::Fraction>("pixel-aspect-ratio")
                    .ok()
                    .map(|par| (par.numer(), par.denom()));
                debug!(width, height, ?pixel_aspect, "Caps event");
                Some(StreamEvent::Caps {
                    size: Size::new(width, height),
                    pixel_aspect,
                })
            }
            EventView::Tag(tag) => {
                let orientation = tag
                    .tag()
                    .get::<gstreamer::tags::ImageOrientation>()
                    .map(|value| Orientation::from_tag(value.get()));
                debug!(?orientation, "Tag event");
                Some(StreamEvent::Tags { orientation })
            }
            EventView::StreamStart(_) => Some(StreamEvent::StreamStart),
            _ => None,
        }
    }
}
