//! Recording episodes.
//!
//! Each episode owns a writer and a background thread that copies frames
//! into it while the episode's flag is set. Stopping clears the flag and
//! returns immediately; the thread notices on its next iteration, finalizes
//! the file and reports back on its completion channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::camera::{Frame, FrameSource, READ_ERROR_DELAY};
use crate::config::MonitorConfig;
use crate::error::Result;

/// File name format for recordings, local time.
pub const FILE_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: [u8; 4],
}

/// An open video file.
pub trait VideoSink: Send {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the container.
    fn finish(self: Box<Self>) -> Result<()>;
}

pub trait SinkFactory: Send + Sync {
    /// Container extension, without the dot.
    fn extension(&self) -> &str;

    fn create(&self, path: &Path, spec: &VideoSpec) -> Result<Box<dyn VideoSink>>;
}

#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    pub path: PathBuf,
    pub frames_written: u64,
    pub reads_skipped: u64,
    /// Set when the episode was aborted by a write failure.
    pub error: Option<String>,
}

struct Episode {
    recording: Arc<AtomicBool>,
    done: flume::Receiver<EpisodeSummary>,
    handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl Episode {
    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.recording.store(false, Ordering::SeqCst);
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("recording thread for {} panicked", self.path.display());
            }
        }
    }
}

pub struct Recorder {
    sinks: Arc<dyn SinkFactory>,
    output_dir: PathBuf,
    fps: u32,
    codec: [u8; 4],
    active: Option<Episode>,
    /// Stopped episodes whose threads may still be finalizing.
    finishing: Vec<Episode>,
}

impl Recorder {
    pub fn new(config: &MonitorConfig, sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            sinks,
            output_dir: config.output_dir.clone(),
            fps: config.fps,
            codec: config.codec,
            active: None,
            finishing: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.as_ref().is_some_and(Episode::is_recording)
    }

    /// Path of the episode currently being written, if any.
    pub fn current_file(&self) -> Option<&Path> {
        self.active
            .as_ref()
            .filter(|e| e.is_recording())
            .map(|e| e.path.as_path())
    }

    /// Open a new file and start copying frames from `source` into it.
    ///
    /// The writer uses the resolution the source reports, which is what the
    /// device negotiated rather than what was requested. Returns `Ok(None)`
    /// if an episode is already running.
    pub fn start(&mut self, source: Box<dyn FrameSource>) -> Result<Option<PathBuf>> {
        if self.is_recording() {
            return Ok(None);
        }
        self.retire_active();

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.episode_path(Local::now());
        let (width, height) = source.resolution();
        let spec = VideoSpec {
            width,
            height,
            fps: self.fps,
            codec: self.codec,
        };
        let sink = self.sinks.create(&path, &spec)?;

        let recording = Arc::new(AtomicBool::new(true));
        let (done_tx, done) = flume::bounded(1);
        let handle = {
            let recording = Arc::clone(&recording);
            let path = path.clone();
            std::thread::Builder::new()
                .name("recorder".to_string())
                .spawn(move || {
                    let summary = record_episode(source, sink, &recording, path);
                    let _ = done_tx.send(summary);
                })?
        };

        log::info!(
            "starting recording {} ({}x{} @ {} fps)",
            path.display(),
            width,
            height,
            self.fps
        );
        self.active = Some(Episode {
            recording,
            done,
            handle: Some(handle),
            path: path.clone(),
        });
        Ok(Some(path))
    }

    /// Clear the recording flag. Does not wait for the file to be finalized.
    /// Returns false if nothing was recording.
    pub fn stop(&mut self) -> bool {
        if !self.is_recording() {
            return false;
        }
        if let Some(episode) = &self.active {
            log::info!("stopping recording {}", episode.path.display());
            episode.stop();
        }
        self.retire_active();
        true
    }

    /// Collect episodes that have finished without blocking, including one
    /// that aborted on its own.
    pub fn reap(&mut self) -> Vec<EpisodeSummary> {
        self.retire_active();
        let mut summaries = Vec::new();
        self.finishing.retain_mut(|episode| match episode.done.try_recv() {
            Ok(summary) => {
                episode.join();
                summaries.push(summary);
                false
            }
            Err(flume::TryRecvError::Empty) => true,
            Err(flume::TryRecvError::Disconnected) => {
                episode.join();
                false
            }
        });
        summaries
    }

    /// Wait up to `timeout` for stopped episodes to finish.
    pub fn wait_stopped(&mut self, timeout: Duration) -> Vec<EpisodeSummary> {
        let deadline = Instant::now() + timeout;
        let mut summaries = Vec::new();
        while let Some(mut episode) = self.finishing.pop() {
            match episode.done.recv_deadline(deadline) {
                Ok(summary) => {
                    episode.join();
                    summaries.push(summary);
                }
                Err(flume::RecvTimeoutError::Disconnected) => episode.join(),
                Err(flume::RecvTimeoutError::Timeout) => {
                    self.finishing.push(episode);
                    break;
                }
            }
        }
        summaries
    }

    /// Stop any active episode and block until every file is finalized.
    pub fn shutdown(&mut self) -> Vec<EpisodeSummary> {
        if let Some(episode) = &self.active {
            episode.stop();
        }
        self.retire_active();

        let mut summaries = Vec::new();
        for mut episode in self.finishing.drain(..) {
            episode.join();
            if let Ok(summary) = episode.done.try_recv() {
                summaries.push(summary);
            }
        }
        summaries
    }

    fn retire_active(&mut self) {
        if let Some(episode) = self.active.take() {
            if episode.is_recording() {
                self.active = Some(episode);
            } else {
                self.finishing.push(episode);
            }
        }
    }

    fn episode_path(&self, now: DateTime<Local>) -> PathBuf {
        let stem = now.format(FILE_TIME_FORMAT).to_string();
        let ext = self.sinks.extension();
        let mut path = self.output_dir.join(format!("{}.{}", stem, ext));
        let mut n = 1;
        while path.exists() {
            n += 1;
            path = self.output_dir.join(format!("{}_{}.{}", stem, n, ext));
        }
        path
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        for summary in self.shutdown() {
            log_summary(&summary);
        }
    }
}

pub fn log_summary(summary: &EpisodeSummary) {
    match &summary.error {
        None => log::info!(
            "recording {} closed: {} frames written, {} reads skipped",
            summary.path.display(),
            summary.frames_written,
            summary.reads_skipped
        ),
        Some(e) => log::error!(
            "recording {} aborted after {} frames: {}",
            summary.path.display(),
            summary.frames_written,
            e
        ),
    }
}

fn record_episode(
    mut source: Box<dyn FrameSource>,
    mut sink: Box<dyn VideoSink>,
    recording: &AtomicBool,
    path: PathBuf,
) -> EpisodeSummary {
    let mut summary = EpisodeSummary {
        path,
        frames_written: 0,
        reads_skipped: 0,
        error: None,
    };

    while recording.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("recording read skipped: {}", e);
                summary.reads_skipped += 1;
                std::thread::sleep(READ_ERROR_DELAY);
                continue;
            }
        };
        if let Err(e) = sink.write(&frame) {
            log::error!("aborting recording {}: {}", summary.path.display(), e);
            summary.error = Some(e.to_string());
            recording.store(false, Ordering::SeqCst);
            break;
        }
        summary.frames_written += 1;
    }

    if let Err(e) = sink.finish() {
        log::error!("could not finalize {}: {}", summary.path.display(), e);
        if summary.error.is_none() {
            summary.error = Some(e.to_string());
        }
    }
    summary
}
