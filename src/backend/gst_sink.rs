// SPDX-License-Identifier: MPL-2.0

//! GStreamer producer bridge
//!
//! An `appsink` whose samples and downstream sink-pad events are forwarded to a
//! [`FrameSink`]. Everything here runs on GStreamer streaming threads and never
//! touches the graphics context.

use super::{FrameSink, ProducerEvent};
use crate::errors::{VideoError, VideoResult};
use crate::media::{NativeBuffer, StreamEvent};
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use tracing::{debug, error, info};

/// Element name used when adding the sink to a pipeline
pub const SINK_NAME: &str = "video-texture-sink";

/// Buffers the appsink may hold before dropping old ones
const MAX_BUFFERS: u32 = 2;

/// Video sink feeding a [`super::VideoTextureBackend`]
pub struct TextureSink {
    appsink: AppSink,
    pad: gstreamer::Pad,
    probe: Option<gstreamer::PadProbeId>,
}

impl TextureSink {
    /// Create the sink element and wire it to `frames`.
    ///
    /// Fails with [`VideoError::PipelineUnavailable`] when the element cannot be
    /// created; callers fall back to another output.
    pub fn new(frames: FrameSink) -> VideoResult<Self> {
        debug!("Creating texture sink");
        let appsink = gstreamer::ElementFactory::make("appsink")
            .name(SINK_NAME)
            .build()?
            .dynamic_cast::<AppSink>()
            .map_err(|_| VideoError::PipelineUnavailable("Failed to cast appsink".to_string()))?;

        let caps = gstreamer_video::VideoCapsBuilder::new()
            .format(gstreamer_video::VideoFormat::Rgba)
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_property("max-buffers", MAX_BUFFERS);
        appsink.set_property("drop", true);
        appsink.set_property("enable-last-sample", false);

        let samples = frames.clone();
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = match appsink.pull_sample() {
                        Ok(s) => s,
                        Err(e) => {
                            error!(error = ?e, "Failed to pull sample");
                            return Err(gstreamer::FlowError::Eos);
                        }
                    };
                    let buffer = sample.buffer_owned().ok_or_else(|| {
                        error!("No buffer in sample");
                        gstreamer::FlowError::Error
                    })?;
                    samples.deliver_buffer(NativeBuffer::from_gst(&buffer));
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        let pad = appsink.static_pad("sink").ok_or_else(|| {
            VideoError::PipelineUnavailable("appsink has no sink pad".to_string())
        })?;
        let probe = pad.add_probe(gstreamer::PadProbeType::EVENT_DOWNSTREAM, move |_, info| {
            let Some(event) = info.event() else {
                return gstreamer::PadProbeReturn::Ok;
            };
            if let Some(parsed) = StreamEvent::from_gst(event) {
                // The appsink renegotiates its buffer pool with new caps
                let renegotiated = matches!(parsed, StreamEvent::Caps { .. });
                frames.post(ProducerEvent::Stream(parsed));
                if renegotiated {
                    frames.notify_buffers_invalidated();
                }
            }
            gstreamer::PadProbeReturn::Ok
        });

        info!(name = SINK_NAME, "Texture sink created");
        Ok(Self {
            appsink,
            pad,
            probe,
        })
    }

    /// The element to link into a pipeline
    pub fn element(&self) -> &gstreamer::Element {
        self.appsink.upcast_ref()
    }
}

impl Drop for TextureSink {
    fn drop(&mut self) {
        debug!("Dropping texture sink");
        self.appsink
            .set_callbacks(gstreamer_app::AppSinkCallbacks::builder().build());
        if let Some(probe) = self.probe.take() {
            self.pad.remove_probe(probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{VideoItem, VideoTextureBackend};
    use crate::config::Config;
    use crate::types::Size;

    #[derive(Default)]
    struct Item {
        implicit_size: Option<Size>,
    }

    impl VideoItem for Item {
        fn set_implicit_size(&mut self, size: Size) {
            self.implicit_size = Some(size);
        }
        fn update(&mut self) {}
        fn native_size_changed(&mut self, _size: Size) {}
    }

    #[test]
    fn test_sink_forwards_caps_events() {
        if gstreamer::init().is_err() {
            return;
        }
        let backend = VideoTextureBackend::new(Config::default());
        let sink = match TextureSink::new(backend.frame_sink()) {
            Ok(sink) => sink,
            // appsink plugin not installed
            Err(_) => return,
        };
        assert_eq!(sink.element().name(), SINK_NAME);

        // Pads only accept events once activated
        if sink.element().set_state(gstreamer::State::Paused).is_err() {
            return;
        }
        let pad = sink.element().static_pad("sink").unwrap();
        let caps = gstreamer_video::VideoCapsBuilder::new()
            .format(gstreamer_video::VideoFormat::Rgba)
            .width(320)
            .height(240)
            .framerate(gstreamer::Fraction::new(30, 1))
            .build();
        pad.send_event(gstreamer::event::StreamStart::new("test"));
        pad.send_event(gstreamer::event::Caps::new(&caps));

        let mut item = Item::default();
        let handled = backend.dispatch_item_events(&mut item);
        let _ = sink.element().set_state(gstreamer::State::Null);

        assert!(handled >= 2, "Resize and invalidation repaint posted");
        assert_eq!(item.implicit_size, Some(Size::new(320, 240)));
    }
}
