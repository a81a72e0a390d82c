// SPDX-License-Identifier: MPL-2.0

//! End-to-end tests driving the backend from a producer thread to paint passes

use std::sync::Arc;
use std::sync::Mutex;
use video_texture::filters::{
    FilterFrame, FilterOutcome, FilterRunnable, RunFlags, SurfaceFormat, VideoFilter,
};
use video_texture::media::{CropRect, HostMemory, MemoryHandle};
use video_texture::{
    Config, NativeBuffer, Orientation, PreprocessNode, ProducerEvent, Rect, Size, SoftwareContext,
    StreamEvent, SubRect, VideoItem, VideoNode, VideoTextureBackend,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const BOUNDS: Rect = Rect::new(0.0, 0.0, 64.0, 48.0);

#[derive(Default)]
struct RecordingItem {
    implicit_sizes: Vec<Size>,
    updates: usize,
}

impl VideoItem for RecordingItem {
    fn set_implicit_size(&mut self, size: Size) {
        self.implicit_sizes.push(size);
    }

    fn update(&mut self) {
        self.updates += 1;
    }

    fn native_size_changed(&mut self, _size: Size) {}
}

fn caps(width: u32, height: u32) -> ProducerEvent {
    ProducerEvent::Stream(StreamEvent::Caps {
        size: Size::new(width, height),
        pixel_aspect: None,
    })
}

fn orientation(orientation: Orientation) -> ProducerEvent {
    ProducerEvent::Stream(StreamEvent::Tags {
        orientation: Some(orientation),
    })
}

fn paint(
    backend: &VideoTextureBackend,
    node: Option<VideoNode>,
    ctx: &mut SoftwareContext,
) -> Option<VideoNode> {
    let mut node = backend.update_paint_node(node, ctx, BOUNDS);
    if let Some(node) = node.as_mut() {
        node.preprocess(ctx);
    }
    node
}

#[test]
fn test_same_memory_keeps_texture_and_applies_crop() {
    let backend = VideoTextureBackend::new(Config::default());
    let sink = backend.frame_sink();
    let mut ctx = SoftwareContext::new();
    sink.post(caps(WIDTH, HEIGHT));

    let memory = MemoryHandle::new(HostMemory::filled(WIDTH, HEIGHT, [10, 20, 30, 255]));

    sink.deliver_buffer(NativeBuffer::new(Some(memory.clone()), None));
    let node = paint(&backend, None, &mut ctx).expect("frame queued");
    let first = node.texture().texture_id().expect("texture imported");
    assert_eq!(node.texture().sub_rect(), SubRect::FULL);

    let crop = CropRect::new(10, 0, WIDTH - 20, HEIGHT);
    sink.deliver_buffer(NativeBuffer::new(Some(memory.clone()), Some(crop)));
    let node = paint(&backend, Some(node), &mut ctx).expect("frame queued");

    assert_eq!(node.texture().texture_id(), Some(first), "Texture reused for the same memory");
    assert_eq!(node.texture().sub_rect().x, 11.0 / WIDTH as f64);
    assert_eq!(node.texture().sub_rect().y, 0.0);
    assert_eq!(ctx.stats().images_created, 1);

    node.destroy(&mut ctx);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_external_images(), 0);
}

#[test]
fn test_orientation_tags_transpose_implicit_size() {
    let backend = VideoTextureBackend::new(Config::default());
    let sink = backend.frame_sink();
    let mut item = RecordingItem::default();

    sink.post(orientation(Orientation::Rotate180));
    sink.post(caps(640, 480));
    backend.dispatch_item_events(&mut item);
    assert_eq!(item.implicit_sizes.last(), Some(&Size::new(640, 480)));

    sink.post(orientation(Orientation::Rotate90));
    sink.post(caps(640, 480));
    backend.dispatch_item_events(&mut item);
    assert_eq!(item.implicit_sizes.last(), Some(&Size::new(480, 640)));
    assert!(item.updates >= 4, "Every posted change requests an item update");
}

#[test]
fn test_invalidation_forces_reimport_of_cached_memory() {
    let backend = VideoTextureBackend::new(Config::default());
    let sink = backend.frame_sink();
    let mut ctx = SoftwareContext::new();
    sink.post(caps(WIDTH, HEIGHT));

    let memory = MemoryHandle::new(HostMemory::filled(WIDTH, HEIGHT, [0, 0, 0, 255]));
    sink.deliver_buffer(NativeBuffer::new(Some(memory.clone()), None));
    let node = paint(&backend, None, &mut ctx);

    sink.notify_buffers_invalidated();
    sink.deliver_buffer(NativeBuffer::new(Some(memory.clone()), None));
    let node = paint(&backend, node, &mut ctx).expect("frame queued");

    assert_eq!(ctx.stats().images_created, 2);
    assert_eq!(node.texture().cached_textures(), 1);
    node.destroy(&mut ctx);
    drop(backend);
    assert_eq!(memory.ref_count(), 1, "Every memory reference released");
}

#[test]
fn test_producer_thread_latest_frame_wins() {
    let backend = VideoTextureBackend::new(Config::default());
    let sink = backend.frame_sink();
    let mut ctx = SoftwareContext::new();
    sink.post(caps(WIDTH, HEIGHT));

    let memories: Vec<MemoryHandle> = (0..8u8)
        .map(|i| MemoryHandle::new(HostMemory::filled(WIDTH, HEIGHT, [i, i, i, 255])))
        .collect();
    let last = memories[7].clone();

    let producer = {
        let sink = sink.clone();
        std::thread::spawn(move || {
            for memory in memories {
                sink.deliver_buffer(NativeBuffer::new(Some(memory), None));
            }
        })
    };
    producer.join().unwrap();

    let node = paint(&backend, None, &mut ctx).expect("frame queued");
    assert_eq!(ctx.stats().images_created, 1, "Only the latest frame is imported");
    assert_eq!(last.ref_count(), 3, "Memory held by the test, its buffer and the cache");

    sink.post(ProducerEvent::Buffer(None));
    assert!(paint(&backend, Some(node), &mut ctx).is_none());
    assert_eq!(last.ref_count(), 1);
    assert_eq!(ctx.live_textures(), 0);
}

struct MutatingFilter {
    calls: Arc<Mutex<Vec<bool>>>,
}

struct MutatingRunnable {
    calls: Arc<Mutex<Vec<bool>>>,
}

impl VideoFilter for MutatingFilter {
    fn create_runnable(&self) -> Box<dyn FilterRunnable> {
        Box::new(MutatingRunnable {
            calls: Arc::clone(&self.calls),
        })
    }
}

impl FilterRunnable for MutatingRunnable {
    fn run(
        &mut self,
        frame: &mut FilterFrame<'_>,
        _format: &SurfaceFormat,
        flags: RunFlags,
    ) -> FilterOutcome {
        self.calls.lock().unwrap().push(flags.last_in_chain);
        match frame.image() {
            Some(image) => {
                let mut inverted = (*image).clone();
                for pixel in inverted.pixels_mut() {
                    pixel.0[0] = 255 - pixel.0[0];
                }
                FilterOutcome::Replaced(inverted)
            }
            None => FilterOutcome::Unchanged,
        }
    }
}

#[test]
fn test_filter_replacement_keeps_original_frame() {
    let backend = VideoTextureBackend::new(Config::default());
    let sink = backend.frame_sink();
    let mut ctx = SoftwareContext::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    backend.append_filter(Arc::new(MutatingFilter {
        calls: calls.clone(),
    }));
    sink.post(caps(WIDTH, HEIGHT));

    let memory = MemoryHandle::new(HostMemory::filled(WIDTH, HEIGHT, [200, 0, 0, 255]));
    sink.deliver_buffer(NativeBuffer::new(Some(memory), None));
    let node = paint(&backend, None, &mut ctx).expect("frame queued");

    assert_eq!(*calls.lock().unwrap(), vec![true]);
    let texture = node.texture().texture_id().expect("original frame still shown");
    let materializer = node.texture().materializer().expect("filters materialize frames");
    let image = materializer.to_image(&mut ctx).expect("frame read back");
    assert_eq!(image.get_pixel(0, 0).0, [200, 0, 0, 255]);
    assert_eq!(materializer.texture_id(), Some(texture));

    node.destroy(&mut ctx);
    assert_eq!(ctx.live_render_targets(), 0);
}
