// SPDX-License-Identifier: MPL-2.0

//! Crate-wide constants

/// Pixels trimmed from each cropped edge when computing the visible sub-rectangle.
///
/// Decoders round crop rectangles, so sampling right up to the crop border bleeds
/// neighbouring (invalid) pixels into the frame edge.
pub const CROP_EDGE_SHRINK: f64 = 1.0;

/// Tracing target for import and bind timings
pub const TIMING_TARGET: &str = "video_texture::timing";

/// GStreamer image-orientation tag values
pub mod orientation_tags {
    pub const ROTATE_90: &str = "rotate-90";
    pub const ROTATE_180: &str = "rotate-180";
    pub const ROTATE_270: &str = "rotate-270";
}

/// Configuration file location and overrides
pub mod config {
    /// Directory below the user config dir
    pub const APP_DIR: &str = "video-texture";
    /// Configuration file name
    pub const FILE_NAME: &str = "config.json";
    /// Non-zero integer disables texture retention between frames
    pub const NO_RETAIN_TEXTURES_ENV: &str = "VIDEO_TEXTURE_NO_RETAIN_TEXTURES";
}

/// Headless player timing
pub mod timing {
    use std::time::Duration;

    /// Paint interval of the headless render loop (~60 Hz)
    pub const PAINT_INTERVAL: Duration = Duration::from_millis(16);
    /// Timeout for pipeline state changes
    pub const STATE_TIMEOUT_SECS: u64 = 5;
}
