//! GStreamer camera and video-file backend.

mod camera;
mod writer;

pub use camera::GstCamera;
pub use writer::{verify_playable, GstSinkFactory, GstVideoWriter, VideoProbe};

use gstreamer as gst;
use gstreamer::prelude::*;

use crate::error::{MonitorError, Result};

/// Bytes per row of a packed RGB buffer; GStreamer pads rows to 4 bytes.
fn rgb_stride(width: u32) -> usize {
    (width as usize * 3 + 3) & !3
}

/// First error message waiting on the pipeline bus, if any.
fn pending_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
    match msg.view() {
        gst::MessageView::Error(err) => Some(format!(
            "{} ({})",
            err.error(),
            err.debug().map(|d| d.to_string()).unwrap_or_default()
        )),
        _ => None,
    }
}

fn make(factory: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|_| MonitorError::Write(format!("missing GStreamer element {}", factory)))
}
