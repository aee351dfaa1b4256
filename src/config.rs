use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// How frames get from the camera to the detection and recording loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FrameMode {
    /// Both loops read the device directly. Frames are split between them
    /// nondeterministically while a recording runs.
    Shared,
    /// A single reader thread broadcasts every frame to bounded, drop-oldest
    /// queues, one per consumer.
    Fanout,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub camera_index: u32,
    /// Requested capture size. The device may negotiate something else.
    pub width: u32,
    pub height: u32,
    pub output_dir: PathBuf,
    pub frame_mode: FrameMode,
    pub fanout_capacity: usize,
    pub poll_interval: Duration,
    pub fps: u32,
    /// Four-character codec identifier written into the container.
    pub codec: [u8; 4],
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            camera_index: 1,
            width: 1280,
            height: 720,
            output_dir: PathBuf::from("/data"),
            frame_mode: FrameMode::Shared,
            fanout_capacity: 1,
            poll_interval: Duration::from_millis(100),
            fps: 20,
            codec: *b"XVID",
        }
    }
}

impl MonitorConfig {
    pub fn codec_name(&self) -> String {
        String::from_utf8_lossy(&self.codec).into_owned()
    }
}

/// Watch a camera and record to disk whenever something moves.
#[derive(Debug, Parser)]
#[command(name = "webcam-monitor", version)]
pub struct Cli {
    /// Capture device index (/dev/video<N>).
    #[arg(short, long, env = "WEBCAM_MONITOR_CAMERA", default_value_t = 1)]
    pub camera: u32,

    /// Requested capture width.
    #[arg(long, default_value_t = 1280, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Requested capture height.
    #[arg(long, default_value_t = 720, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,

    /// Directory recordings are written to.
    #[arg(short, long, env = "WEBCAM_MONITOR_OUTPUT_DIR", default_value = "/data")]
    pub output_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = FrameMode::Shared)]
    pub frame_mode: FrameMode,

    /// Queue depth per consumer in fan-out mode.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub fanout_capacity: u64,
}

impl From<Cli> for MonitorConfig {
    fn from(cli: Cli) -> Self {
        MonitorConfig {
            camera_index: cli.camera,
            width: cli.width,
            height: cli.height,
            output_dir: cli.output_dir,
            frame_mode: cli.frame_mode,
            fanout_capacity: cli.fanout_capacity as usize,
            ..MonitorConfig::default()
        }
    }
}
