//! In-memory camera and writer doubles for unit tests.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};
use parking_lot::Mutex;

use crate::camera::{CameraSession, Frame};
use crate::error::{MonitorError, Result};
use crate::recorder::{SinkFactory, VideoSink, VideoSpec};

/// Camera that keeps returning whatever scene it was last given.
pub struct ScriptedCamera {
    scene: Mutex<Frame>,
    failures: AtomicUsize,
    reads: AtomicUsize,
    released: AtomicBool,
}

impl ScriptedCamera {
    pub fn new(scene: Frame) -> Self {
        Self {
            scene: Mutex::new(scene),
            failures: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    pub fn show(&self, scene: Frame) {
        *self.scene.lock() = scene;
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl CameraSession for ScriptedCamera {
    fn read_frame(&self) -> Result<Frame> {
        // roughly camera pacing, keeps recording threads from spinning
        std::thread::sleep(Duration::from_millis(2));

        if self.is_released() {
            return Err(MonitorError::Capture("camera released".to_string()));
        }
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(MonitorError::Capture("scripted failure".to_string()));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.scene.lock().clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.scene.lock().dimensions()
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

pub fn black(width: u32, height: u32) -> Frame {
    RgbImage::new(width, height)
}

pub fn with_square(mut frame: Frame, x0: u32, y0: u32, side: u32) -> Frame {
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            frame.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    frame
}

#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub path: PathBuf,
    pub spec: VideoSpec,
    pub frames: usize,
    pub finished: bool,
}

/// Writes a tiny marker file per episode and keeps a record of every sink.
#[derive(Default)]
pub struct MemorySinks {
    records: Arc<Mutex<Vec<SinkRecord>>>,
    fail_after: Option<usize>,
    refuse_create: bool,
}

impl MemorySinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sink rejects writes after `frames` successful ones.
    pub fn failing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_create: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().clone()
    }
}

impl SinkFactory for MemorySinks {
    fn extension(&self) -> &str {
        "avi"
    }

    fn create(&self, path: &Path, spec: &VideoSpec) -> Result<Box<dyn VideoSink>> {
        if self.refuse_create {
            return Err(MonitorError::Write("encoder unavailable".to_string()));
        }
        let mut file = File::create(path)?;
        file.write_all(&spec.codec)?;

        let mut records = self.records.lock();
        records.push(SinkRecord {
            path: path.to_path_buf(),
            spec: spec.clone(),
            frames: 0,
            finished: false,
        });
        Ok(Box::new(MemorySink {
            index: records.len() - 1,
            records: Arc::clone(&self.records),
            path: path.to_path_buf(),
            fail_after: self.fail_after,
        }))
    }
}

struct MemorySink {
    index: usize,
    records: Arc<Mutex<Vec<SinkRecord>>>,
    path: PathBuf,
    fail_after: Option<usize>,
}

impl VideoSink for MemorySink {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        let mut records = self.records.lock();
        let record = &mut records[self.index];
        if self.fail_after.is_some_and(|limit| record.frames >= limit) {
            return Err(MonitorError::Write("disk full".to_string()));
        }
        record.frames += 1;

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&frame.width().to_le_bytes())?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.records.lock()[self.index].finished = true;
        Ok(())
    }
}
