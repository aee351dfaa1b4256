use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;

use crate::config::FrameMode;
use crate::error::Result;
use crate::feed::FrameFeed;

pub type Frame = RgbImage;

/// Back-off after a failed device read so a dead camera does not spin.
pub(crate) const READ_ERROR_DELAY: Duration = Duration::from_millis(10);

/// An open capture device.
///
/// Reads take `&self` so a session can be shared between the detection and
/// recording threads.
pub trait CameraSession: Send + Sync {
    /// Block until the next frame is available.
    fn read_frame(&self) -> Result<Frame>;

    /// Resolution the device actually negotiated.
    fn resolution(&self) -> (u32, u32);

    /// Stop the device. In-flight and later reads fail instead of blocking.
    /// Must be idempotent.
    fn release(&self);
}

/// Where one loop pulls its frames from.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame>;
    fn resolution(&self) -> (u32, u32);
}

/// Reads the device directly, competing with every other direct reader.
pub struct DirectReader {
    session: Arc<dyn CameraSession>,
}

impl FrameSource for DirectReader {
    fn next_frame(&mut self) -> Result<Frame> {
        self.session.read_frame()
    }

    fn resolution(&self) -> (u32, u32) {
        self.session.resolution()
    }
}

/// Hands out frame sources according to the configured [`FrameMode`] and owns
/// the session's lifetime.
pub enum FrameTap {
    Shared(Arc<dyn CameraSession>),
    Fanout(FrameFeed),
}

impl FrameTap {
    pub fn new(session: Arc<dyn CameraSession>, mode: FrameMode, capacity: usize) -> Self {
        match mode {
            FrameMode::Shared => FrameTap::Shared(session),
            FrameMode::Fanout => FrameTap::Fanout(FrameFeed::start(session, capacity)),
        }
    }

    pub fn reader(&self, name: &str) -> Box<dyn FrameSource> {
        match self {
            FrameTap::Shared(session) => {
                log::debug!("{} reads the camera directly", name);
                Box::new(DirectReader {
                    session: Arc::clone(session),
                })
            }
            FrameTap::Fanout(feed) => Box::new(feed.subscribe(name)),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        match self {
            FrameTap::Shared(session) => session.resolution(),
            FrameTap::Fanout(feed) => feed.resolution(),
        }
    }

    pub fn release(&mut self) {
        match self {
            FrameTap::Shared(session) => session.release(),
            FrameTap::Fanout(feed) => feed.stop(),
        }
    }
}
