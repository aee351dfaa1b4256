use std::sync::atomic::{AtomicBool, Ordering};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use image::RgbImage;
use parking_lot::Mutex;

use super::{pending_error, rgb_stride};
use crate::camera::{CameraSession, Frame};
use crate::error::{MonitorError, Result};

/// How long the device gets to produce its first frame.
const OPEN_TIMEOUT_SECS: u64 = 5;

/// `v4l2src ! videoconvert ! appsink`, RGB out.
///
/// The requested size is listed first in the sink caps so negotiation
/// prefers it, with any RGB size as fallback.
pub struct GstCamera {
    index: u32,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    resolution: (u32, u32),
    /// Frame pulled while probing the negotiated caps, handed out first.
    pending: Mutex<Option<Frame>>,
    released: AtomicBool,
}

impl GstCamera {
    pub fn open(index: u32, width: u32, height: u32) -> Result<Self> {
        let device_error = |reason: String| MonitorError::Device { index, reason };

        gst::init().map_err(|e| device_error(e.to_string()))?;

        let source = gst::ElementFactory::make("v4l2src")
            .property("device", format!("/dev/video{}", index))
            .build()
            .map_err(|e| device_error(e.to_string()))?;
        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| device_error(e.to_string()))?;

        let mut caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", width as i32)
            .field("height", height as i32)
            .build();
        caps.make_mut()
            .append(gst::Caps::builder("video/x-raw").field("format", "RGB").build());

        let appsink = gst_app::AppSink::builder().caps(&caps).build();
        appsink.set_max_buffers(2);
        appsink.set_drop(true);
        appsink.set_property("sync", false);

        let pipeline = gst::Pipeline::default();
        pipeline
            .add_many([&source, &convert, appsink.upcast_ref()])
            .map_err(|e| device_error(e.to_string()))?;
        gst::Element::link_many([&source, &convert, appsink.upcast_ref()])
            .map_err(|e| device_error(e.to_string()))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let reason = pending_error(&pipeline).unwrap_or_else(|| e.to_string());
            let _ = pipeline.set_state(gst::State::Null);
            return Err(device_error(reason));
        }

        let sample = appsink.try_pull_sample(gst::ClockTime::from_seconds(OPEN_TIMEOUT_SECS));
        let first = match first_frame(sample, || pending_error(&pipeline)) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(e);
            }
        };

        let resolution = first.dimensions();
        log::info!(
            "opened /dev/video{} at {}x{}",
            index,
            resolution.0,
            resolution.1
        );

        Ok(Self {
            index,
            pipeline,
            appsink,
            resolution,
            pending: Mutex::new(Some(first)),
            released: AtomicBool::new(false),
        })
    }
}

impl CameraSession for GstCamera {
    fn read_frame(&self) -> Result<Frame> {
        if let Some(frame) = self.pending.lock().take() {
            return Ok(frame);
        }
        if self.released.load(Ordering::SeqCst) {
            return Err(MonitorError::Capture("camera released".to_string()));
        }
        let sample = self.appsink.pull_sample().map_err(|_| {
            let reason = pending_error(&self.pipeline)
                .unwrap_or_else(|| "camera stream ended".to_string());
            MonitorError::Capture(reason)
        })?;
        sample_to_frame(&sample)
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("camera {} did not stop cleanly: {}", self.index, e);
        }
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// The device is streaming at this point, so a missing or unusable first
/// sample is a capture failure, not a device failure.
fn first_frame<F>(sample: Option<gst::Sample>, bus_error: F) -> Result<Frame>
where
    F: FnOnce() -> Option<String>,
{
    match sample {
        Some(sample) => sample_to_frame(&sample),
        None => Err(MonitorError::Capture(
            bus_error().unwrap_or_else(|| "no frame within timeout".to_string()),
        )),
    }
}

fn sample_to_frame(sample: &gst::Sample) -> Result<Frame> {
    let caps = sample
        .caps()
        .ok_or_else(|| MonitorError::Capture("sample without caps".to_string()))?;
    let s = caps
        .structure(0)
        .ok_or_else(|| MonitorError::Capture("empty caps".to_string()))?;
    let width = s
        .get::<i32>("width")
        .map_err(|e| MonitorError::Capture(e.to_string()))? as u32;
    let height = s
        .get::<i32>("height")
        .map_err(|e| MonitorError::Capture(e.to_string()))? as u32;

    let buffer = sample
        .buffer()
        .ok_or_else(|| MonitorError::Capture("sample without buffer".to_string()))?;
    let map = buffer
        .map_readable()
        .map_err(|e| MonitorError::Capture(e.to_string()))?;
    let data = map.as_slice();

    if width == 0 || height == 0 {
        return Err(MonitorError::Capture(format!("empty frame {}x{}", width, height)));
    }
    let stride = rgb_stride(width);
    let row = width as usize * 3;
    if data.len() < stride * (height as usize - 1) + row {
        return Err(MonitorError::Capture(format!(
            "short buffer: {} bytes for {}x{}",
            data.len(),
            width,
            height
        )));
    }

    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        pixels.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| MonitorError::Capture("frame size mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_sample(width: i32, height: i32, data: Vec<u8>) -> gst::Sample {
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", width)
            .field("height", height)
            .build();
        gst::Sample::builder()
            .caps(&caps)
            .buffer(&gst::Buffer::from_mut_slice(data))
            .build()
    }

    #[test]
    fn first_frame_timeout_is_a_capture_error() {
        gst::init().unwrap();
        let err = first_frame(None, || None).unwrap_err();
        assert!(matches!(err, MonitorError::Capture(ref r) if r.contains("timeout")));
    }

    #[test]
    fn first_frame_reports_bus_error() {
        gst::init().unwrap();
        let err = first_frame(None, || Some("device busy".to_string())).unwrap_err();
        assert!(matches!(err, MonitorError::Capture(ref r) if r == "device busy"));
    }

    #[test]
    fn unusable_first_sample_is_a_capture_error() {
        gst::init().unwrap();
        let sample = gst::Sample::builder().build();
        let err = first_frame(Some(sample), || None).unwrap_err();
        assert!(matches!(err, MonitorError::Capture(_)));
    }

    #[test]
    fn padded_rows_are_unpacked() {
        gst::init().unwrap();
        // 5 px wide: 15 bytes of pixels padded to a 16 byte stride
        let mut data = vec![0u8; 16 * 2];
        data[15] = 0xff;
        data[16] = 7;
        let frame = first_frame(Some(rgb_sample(5, 2, data)), || None).unwrap();

        assert_eq!(frame.dimensions(), (5, 2));
        assert_eq!(frame.get_pixel(0, 1)[0], 7);
        assert!(frame.as_raw().iter().all(|&b| b != 0xff));
    }
}
