// SPDX-License-Identifier: MPL-2.0

//! Error types for the video texture pipeline
//!
//! Render-path failures are logged and degrade to "render nothing" rather than
//! crossing the producer/render thread boundary. These types are returned from
//! setup code and from the GPU seam, whose callers decide how to degrade.

use std::fmt;

/// Result type alias using VideoError
pub type VideoResult<T> = Result<T, VideoError>;

/// Main error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoError {
    /// External-image creation failed for a buffer's memory
    ImportFailure(String),
    /// A GPU operation was attempted without a bound graphics context
    NoGraphicsContext(String),
    /// The producer element could not be created
    PipelineUnavailable(String),
    /// A filter replaced the frame, which cannot be written back to the display path
    UnsupportedFilterMutation {
        /// Position of the first filter in the chain that replaced the frame
        filter_index: usize,
    },
    /// Any other GPU-side failure (missing target, unknown texture, ...)
    Gpu(String),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for VideoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoError::ImportFailure(msg) => write!(f, "External image import failed: {}", msg),
            VideoError::NoGraphicsContext(msg) => {
                write!(f, "No current graphics context: {}", msg)
            }
            VideoError::PipelineUnavailable(msg) => write!(f, "Pipeline unavailable: {}", msg),
            VideoError::UnsupportedFilterMutation { filter_index } => write!(
                f,
                "Filter {} changed the frame, writing frames back is not supported",
                filter_index
            ),
            VideoError::Gpu(msg) => write!(f, "GPU error: {}", msg),
            VideoError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for VideoError {}

impl From<gstreamer::glib::BoolError> for VideoError {
    fn from(err: gstreamer::glib::BoolError) -> Self {
        VideoError::PipelineUnavailable(err.to_string())
    }
}

impl From<gstreamer::glib::Error> for VideoError {
    fn from(err: gstreamer::glib::Error) -> Self {
        VideoError::PipelineUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for VideoError {
    fn from(err: serde_json::Error) -> Self {
        VideoError::Config(err.to_string())
    }
}

impl From<std::io::Error> for VideoError {
    fn from(err: std::io::Error) -> Self {
        VideoError::Config(err.to_string())
    }
}
