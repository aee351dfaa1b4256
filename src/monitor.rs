use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::GrayImage;

use crate::camera::{CameraSession, FrameSource, FrameTap};
use crate::config::MonitorConfig;
use crate::detection::MotionDetector;
use crate::error::Result;
use crate::recorder::{log_summary, Recorder, SinkFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    StartRecording,
    StopRecording,
}

fn transition(recording: bool, motion: bool) -> Transition {
    match (recording, motion) {
        (false, true) => Transition::StartRecording,
        (true, false) => Transition::StopRecording,
        _ => Transition::None,
    }
}

/// Watches one camera and records while something in the scene differs from
/// the reference frame taken at startup.
pub struct MotionMonitor {
    config: MonitorConfig,
    tap: FrameTap,
    detection: Box<dyn FrameSource>,
    reference: GrayImage,
    detector: MotionDetector,
    recorder: Recorder,
    shutdown: Arc<AtomicBool>,
    closed: bool,
}

impl MotionMonitor {
    /// Open the configured camera through GStreamer and take the reference
    /// frame.
    #[cfg(feature = "gst")]
    pub fn open(config: MonitorConfig) -> Result<Self> {
        use crate::gst::{GstCamera, GstSinkFactory};

        let camera = GstCamera::open(config.camera_index, config.width, config.height)?;
        Self::with_backend(config, Arc::new(camera), Arc::new(GstSinkFactory::new()))
    }

    /// Build a monitor over an already opened session. The session is
    /// released if the reference frame cannot be captured.
    pub fn with_backend(
        config: MonitorConfig,
        session: Arc<dyn CameraSession>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<Self> {
        let mut tap = FrameTap::new(session, config.frame_mode, config.fanout_capacity);
        let mut detection = tap.reader("detector");
        let detector = MotionDetector::default();

        let first = match detection.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                drop(detection);
                tap.release();
                return Err(e);
            }
        };
        let reference = detector.to_gray_blur(&first);

        let (width, height) = tap.resolution();
        log::info!(
            "monitoring camera {} at {}x{} (requested {}x{}), {:?} frame mode",
            config.camera_index,
            width,
            height,
            config.width,
            config.height,
            config.frame_mode
        );
        if (width, height) != (config.width, config.height) {
            log::warn!(
                "camera negotiated {}x{} instead of {}x{}",
                width,
                height,
                config.width,
                config.height
            );
        }

        let recorder = Recorder::new(&config, sinks);
        Ok(Self {
            config,
            tap,
            detection,
            reference,
            detector,
            recorder,
            shutdown: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }

    /// Flag that ends [`run`](Self::run) when set, e.g. from a signal handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    /// Poll until the shutdown flag is raised.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::SeqCst) {
            self.look_for_changes();
            for summary in self.recorder.reap() {
                log_summary(&summary);
            }
            std::thread::sleep(self.config.poll_interval);
        }
        log::info!("shutdown requested");
        Ok(())
    }

    /// One poll: grab a frame, compare it with the reference and start or
    /// stop recording. Returns the transition actually taken.
    pub fn look_for_changes(&mut self) -> Transition {
        let frame = match self.detection.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("{}", e);
                return Transition::None;
            }
        };
        let current = self.detector.to_gray_blur(&frame);
        let motion = self.detector.detect(&self.reference, &current);

        match transition(self.recorder.is_recording(), motion) {
            Transition::StartRecording => {
                let source = self.tap.reader("recorder");
                match self.recorder.start(source) {
                    Ok(Some(_)) => Transition::StartRecording,
                    Ok(None) => Transition::None,
                    Err(e) => {
                        log::error!("could not start recording: {}", e);
                        Transition::None
                    }
                }
            }
            Transition::StopRecording => {
                if self.recorder.stop() {
                    Transition::StopRecording
                } else {
                    Transition::None
                }
            }
            Transition::None => Transition::None,
        }
    }

    /// Stop recording, release the camera and wait for open files to be
    /// finalized. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.recorder.stop();
        self.tap.release();
        for summary in self.recorder.shutdown() {
            log_summary(&summary);
        }
        log::info!("camera {} released", self.config.camera_index);
    }
}

/// Open a monitor with `open`, logging any failure and turning it into a
/// non-zero exit status for the process.
pub fn open_or_exit<F>(
    config: MonitorConfig,
    open: F,
) -> std::result::Result<MotionMonitor, ExitCode>
where
    F: FnOnce(MonitorConfig) -> Result<MotionMonitor>,
{
    open(config).map_err(|e| {
        log::error!("{}", e);
        ExitCode::FAILURE
    })
}

impl Drop for MotionMonitor {
    fn drop(&mut self) {
        self.close();
    }
}
