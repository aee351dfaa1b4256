use std::path::Path;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_pbutils as gst_pbutils;

use super::{make, pending_error, rgb_stride};
use crate::camera::Frame;
use crate::error::{MonitorError, Result};
use crate::recorder::{SinkFactory, VideoSink, VideoSpec};

/// How long finalizing a file may take before the pipeline is torn down.
const EOS_TIMEOUT_SECS: u64 = 10;

/// Encoder elements that produce the stream for a four-character code, in
/// order of preference.
fn encoders_for(codec: &[u8; 4]) -> &'static [&'static str] {
    match codec {
        b"XVID" | b"DIVX" | b"FMP4" => &["xvidenc", "avenc_mpeg4"],
        b"MJPG" => &["jpegenc"],
        b"H264" | b"X264" => &["x264enc", "openh264enc"],
        _ => &["avenc_mpeg4"],
    }
}

/// Creates AVI writers backed by GStreamer pipelines.
#[derive(Debug, Default)]
pub struct GstSinkFactory;

impl GstSinkFactory {
    pub fn new() -> Self {
        GstSinkFactory
    }
}

impl SinkFactory for GstSinkFactory {
    fn extension(&self) -> &str {
        "avi"
    }

    fn create(&self, path: &Path, spec: &VideoSpec) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(GstVideoWriter::create(path, spec)?))
    }
}

/// `appsrc ! videoconvert ! <encoder> ! avimux ! filesink`
pub struct GstVideoWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    width: u32,
    height: u32,
    fps: u32,
    frames_pushed: u64,
}

impl GstVideoWriter {
    pub fn create(path: &Path, spec: &VideoSpec) -> Result<Self> {
        gst::init()?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", spec.width as i32)
            .field("height", spec.height as i32)
            .field("framerate", gst::Fraction::new(spec.fps as i32, 1))
            .build();
        let appsrc = gst_app::AppSrc::builder()
            .caps(&caps)
            .format(gst::Format::Time)
            .build();

        let convert = make("videoconvert")?;
        let encoder = encoders_for(&spec.codec)
            .iter()
            .find_map(|name| make(name).ok())
            .ok_or_else(|| {
                MonitorError::Write(format!(
                    "no encoder available for {}",
                    String::from_utf8_lossy(&spec.codec)
                ))
            })?;
        let muxer = make("avimux")?;
        let sink = make("filesink")?;
        let location = path
            .to_str()
            .ok_or_else(|| MonitorError::Write(format!("non-utf8 path {}", path.display())))?;
        sink.set_property("location", location);

        let pipeline = gst::Pipeline::default();
        pipeline.add_many([appsrc.upcast_ref(), &convert, &encoder, &muxer, &sink])?;
        gst::Element::link_many([appsrc.upcast_ref(), &convert, &encoder, &muxer, &sink])?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| MonitorError::Write(format!("failed to start writer: {}", e)))?;

        log::debug!(
            "writer for {} using {}",
            path.display(),
            encoder
                .factory()
                .map(|f| f.name().to_string())
                .unwrap_or_default()
        );

        Ok(Self {
            pipeline,
            appsrc,
            width: spec.width,
            height: spec.height,
            fps: spec.fps,
            frames_pushed: 0,
        })
    }
}

impl VideoSink for GstVideoWriter {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(MonitorError::Write(format!(
                "frame is {}x{}, file is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        if let Some(reason) = pending_error(&self.pipeline) {
            return Err(MonitorError::Write(reason));
        }

        let stride = rgb_stride(self.width);
        let row = self.width as usize * 3;
        let mut data = vec![0u8; stride * self.height as usize];
        for (y, src) in frame.as_raw().chunks_exact(row).enumerate() {
            data[y * stride..y * stride + row].copy_from_slice(src);
        }

        let frame_ns = 1_000_000_000 / self.fps as u64;
        let mut buffer = gst::Buffer::from_mut_slice(data);
        if let Some(buf_ref) = buffer.get_mut() {
            buf_ref.set_pts(gst::ClockTime::from_nseconds(self.frames_pushed * frame_ns));
            buf_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| MonitorError::Write(format!("push failed: {:?}", e)))?;
        self.frames_pushed += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| MonitorError::Write(format!("failed to send EOS: {:?}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| MonitorError::Write("writer pipeline has no bus".to_string()))?;
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
            match msg.view() {
                gst::MessageView::Eos(..) => return Ok(()),
                gst::MessageView::Error(err) => {
                    return Err(MonitorError::Write(format!(
                        "{} ({})",
                        err.error(),
                        err.debug().map(|d| d.to_string()).unwrap_or_default()
                    )));
                }
                _ => {}
            }
        }
        Err(MonitorError::Write("timed out finalizing file".to_string()))
    }
}

impl Drop for GstVideoWriter {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub width: u32,
    pub height: u32,
    pub duration: Option<Duration>,
}

/// Open a finished recording with the discoverer and report its video stream.
pub fn verify_playable(path: &Path) -> Result<VideoProbe> {
    gst::init()?;

    let path = path.canonicalize()?;
    let uri = glib::filename_to_uri(&path, None)?;
    let discoverer = gst_pbutils::Discoverer::new(gst::ClockTime::from_seconds(5))?;
    let info = discoverer.discover_uri(uri.as_str())?;

    let video = info
        .video_streams()
        .into_iter()
        .next()
        .ok_or_else(|| MonitorError::Write(format!("{} has no video stream", path.display())))?;

    Ok(VideoProbe {
        width: video.width(),
        height: video.height(),
        duration: info
            .duration()
            .map(|d| Duration::from_nanos(d.nseconds())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xvid_prefers_xvidenc() {
        assert_eq!(encoders_for(b"XVID")[0], "xvidenc");
        assert!(encoders_for(b"XVID").contains(&"avenc_mpeg4"));
    }

    #[test]
    fn unknown_codec_falls_back_to_mpeg4() {
        assert_eq!(encoders_for(b"ABCD"), &["avenc_mpeg4"]);
    }
}
