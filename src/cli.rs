// SPDX-License-Identifier: MPL-2.0

//! CLI commands for the headless player
//!
//! This module provides command-line functionality for:
//! - Playing a stream through the texture backend with a GL or software renderer
//! - Saving materialized frames through a snapshot filter
//! - Printing the effective configuration

use gstreamer::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use video_texture::constants::timing::{PAINT_INTERVAL, STATE_TIMEOUT_SECS};
use video_texture::filters::{
    FilterFrame, FilterOutcome, FilterRunnable, RunFlags, SurfaceFormat, VideoFilter,
};
use video_texture::{
    Config, GlContext, GraphicsContext, PreprocessNode, Rect, Size, SoftwareContext, TextureSink,
    VideoItem, VideoNode, VideoResult, VideoTextureBackend,
};

/// Graphics context the player paints with
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RendererKind {
    /// CPU rasterizer, imports any mappable memory
    Software,
    /// Headless EGL context, imports dmabuf memory zero-copy
    Gl,
}

enum Renderer {
    Software(SoftwareContext),
    Gl(GlContext),
}

impl Renderer {
    fn new(kind: RendererKind) -> VideoResult<Self> {
        Ok(match kind {
            RendererKind::Software => Renderer::Software(SoftwareContext::new()),
            RendererKind::Gl => Renderer::Gl(GlContext::headless()?),
        })
    }

    fn context(&mut self) -> &mut dyn GraphicsContext {
        match self {
            Renderer::Software(ctx) => ctx,
            Renderer::Gl(ctx) => ctx,
        }
    }

    fn print_stats(&self, painted: u64) {
        match self {
            Renderer::Software(ctx) => {
                let stats = ctx.stats();
                println!(
                    "Painted {} frames, {} imports, {} binds",
                    painted, stats.images_created, stats.binds
                );
            }
            Renderer::Gl(_) => println!("Painted {} frames", painted),
        }
    }
}

/// Options of the `play` command
pub struct PlayOptions {
    pub renderer: RendererKind,
    pub uri: Option<String>,
    pub frames: Option<u64>,
    pub orientation: i32,
    pub mirror: bool,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_every: u64,
}

/// Print the effective configuration as JSON
pub fn print_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    if let Some(path) = Config::default_path() {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Item without a window: its bounds follow the implicit size
#[derive(Debug, Default)]
struct HeadlessItem {
    bounds: Rect,
    resized: bool,
    update_requested: bool,
}

impl VideoItem for HeadlessItem {
    fn set_implicit_size(&mut self, size: Size) {
        self.bounds = Rect::new(0.0, 0.0, size.width as f64, size.height as f64);
        self.resized = true;
    }

    fn update(&mut self) {
        self.update_requested = true;
    }

    fn native_size_changed(&mut self, size: Size) {
        println!("Native size: {}", size);
    }
}

/// Saves every Nth materialized frame as PNG
struct SnapshotFilter {
    dir: PathBuf,
    every: u64,
}

struct SnapshotRunnable {
    dir: PathBuf,
    every: u64,
    frames: u64,
}

impl VideoFilter for SnapshotFilter {
    fn create_runnable(&self) -> Box<dyn FilterRunnable> {
        Box::new(SnapshotRunnable {
            dir: self.dir.clone(),
            every: self.every.max(1),
            frames: 0,
        })
    }
}

impl FilterRunnable for SnapshotRunnable {
    fn run(
        &mut self,
        frame: &mut FilterFrame<'_>,
        format: &SurfaceFormat,
        _flags: RunFlags,
    ) -> FilterOutcome {
        self.frames += 1;
        if self.frames % self.every != 0 {
            return FilterOutcome::Unchanged;
        }

        let Some(image) = frame.image() else {
            warn!(frame = self.frames, "Frame could not be materialized");
            return FilterOutcome::Unchanged;
        };
        let path = self.dir.join(format!("frame_{:06}.png", self.frames));
        match image.save(&path) {
            Ok(()) => {
                info!(path = %path.display(), size = %format.size, "Snapshot saved");
                println!("Snapshot saved: {}", path.display());
            }
            Err(e) => error!(path = %path.display(), error = %e, "Failed to save snapshot"),
        }
        FilterOutcome::Unchanged
    }
}

fn build_pipeline(
    uri: Option<&str>,
    sink: &TextureSink,
) -> Result<gstreamer::Pipeline, Box<dyn std::error::Error>> {
    let pipeline = gstreamer::Pipeline::new();
    let convert = gstreamer::ElementFactory::make("videoconvert").build()?;
    pipeline.add_many([&convert, sink.element()])?;
    convert.link(sink.element())?;

    match uri {
        Some(uri) => {
            let decode = gstreamer::ElementFactory::make("uridecodebin")
                .property("uri", uri)
                .build()?;
            pipeline.add(&decode)?;
            let convert_weak = convert.downgrade();
            decode.connect_pad_added(move |_, pad| {
                let Some(convert) = convert_weak.upgrade() else {
                    return;
                };
                let is_video = pad
                    .current_caps()
                    .and_then(|caps| caps.structure(0).map(|s| s.name().starts_with("video/")))
                    .unwrap_or(false);
                if !is_video {
                    return;
                }
                let Some(sink_pad) = convert.static_pad("sink") else {
                    return;
                };
                if sink_pad.is_linked() {
                    return;
                }
                if let Err(e) = pad.link(&sink_pad) {
                    error!(error = ?e, "Failed to link decoded video pad");
                }
            });
        }
        None => {
            let source = gstreamer::ElementFactory::make("videotestsrc")
                .property("is-live", true)
                .build()?;
            pipeline.add(&source)?;
            source.link(&convert)?;
        }
    }

    Ok(pipeline)
}

/// Play a stream through the backend, painting with the software context
pub fn play(options: PlayOptions) -> Result<(), Box<dyn std::error::Error>> {
    gstreamer::init()?;

    let config = Config::load()?;
    let backend = VideoTextureBackend::new(config);
    backend.set_orientation(options.orientation);
    backend.set_mirror(options.mirror);

    if let Some(dir) = &options.snapshot_dir {
        std::fs::create_dir_all(dir)?;
        println!("Snapshots: {} (every {} frames)", dir.display(), options.snapshot_every);
        backend.append_filter(Arc::new(SnapshotFilter {
            dir: dir.clone(),
            every: options.snapshot_every,
        }));
    }

    let sink = TextureSink::new(backend.frame_sink())?;
    let pipeline = build_pipeline(options.uri.as_deref(), &sink)?;

    pipeline.set_state(gstreamer::State::Playing)?;
    let (result, state, _) = pipeline.state(gstreamer::ClockTime::from_seconds(STATE_TIMEOUT_SECS));
    debug!(?result, ?state, "Pipeline state");

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Playing... (press Ctrl+C to stop)");

    let mut renderer = Renderer::new(options.renderer)?;
    let ctx = renderer.context();
    let mut item = HeadlessItem::default();
    let mut node: Option<VideoNode> = None;
    let mut painted = 0u64;
    let start = Instant::now();
    let bus = pipeline.bus();

    let outcome = loop {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break Ok(());
        }
        if options.frames.is_some_and(|limit| painted >= limit) {
            break Ok(());
        }

        if let Some(bus) = &bus {
            if let Some(message) = bus.pop_filtered(&[
                gstreamer::MessageType::Eos,
                gstreamer::MessageType::Error,
            ]) {
                match message.view() {
                    gstreamer::MessageView::Eos(_) => {
                        println!();
                        println!("End of stream");
                        break Ok(());
                    }
                    gstreamer::MessageView::Error(err) => {
                        break Err(format!("Pipeline error: {}", err.error()));
                    }
                    _ => {}
                }
            }
        }

        backend.dispatch_item_events(&mut item);
        if std::mem::take(&mut item.resized) {
            backend.update_geometry();
        }

        if std::mem::take(&mut item.update_requested) {
            node = backend.update_paint_node(node.take(), ctx, item.bounds);
            if let Some(node) = node.as_mut() {
                node.preprocess(ctx);
                node.take_dirty();
                painted += 1;
            }
            backend.after_rendering(node.as_mut(), ctx);

            let elapsed = start.elapsed().as_secs();
            print!(
                "\rFrames: {} ({:02}:{:02})",
                painted,
                elapsed / 60,
                elapsed % 60
            );
            std::io::Write::flush(&mut std::io::stdout())?;
        }

        std::thread::sleep(PAINT_INTERVAL);
    };
    println!();

    if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
        warn!(error = ?e, "Failed to stop pipeline");
    }
    if let Some(node) = node.take() {
        node.destroy(ctx);
    }
    drop(sink);
    renderer.print_stats(painted);

    outcome.map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_renderer_is_current() {
        let mut renderer = Renderer::new(RendererKind::Software).unwrap();
        assert!(renderer.context().is_current());
    }

    #[test]
    fn test_headless_item_follows_implicit_size() {
        let mut item = HeadlessItem::default();
        item.set_implicit_size(Size::new(320, 240));
        assert!(item.resized);
        assert_eq!(item.bounds, Rect::new(0.0, 0.0, 320.0, 240.0));
    }
}
