//! Single-reader camera feed with per-consumer queues.
//!
//! One thread owns the device and broadcasts every frame to each subscriber.
//! Queues are bounded; when a subscriber falls behind its oldest frame is
//! dropped so it always sees the most recent scene. A capacity of 1 turns the
//! queue into a latest-frame mailbox.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use crate::camera::{CameraSession, Frame, FrameSource, READ_ERROR_DELAY};
use crate::error::{MonitorError, Result};

type Delivery = std::result::Result<Arc<Frame>, String>;

struct Subscriber {
    sender: Sender<Delivery>,
    /// Second handle on the subscriber's queue, used to evict the oldest entry.
    drain: Receiver<Delivery>,
    name: String,
    id: u64,
}

impl Subscriber {
    fn deliver(&self, mut item: Delivery) {
        for _ in 0..2 {
            match self.sender.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.drain.try_recv();
                    item = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        log::debug!("[FEED] dropped frame for {}", self.name);
    }
}

pub struct FrameFeed {
    session: Arc<dyn CameraSession>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_subscriber_id: AtomicU64,
    capacity: usize,
    stop_signal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Receiving end of a feed subscription. Unsubscribes on drop.
pub struct Subscription {
    receiver: Receiver<Delivery>,
    id: u64,
    resolution: (u32, u32),
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subs = self.subscribers.write();
        subs.retain(|s| s.id != self.id);
        log::debug!(
            "[FEED] subscriber {} dropped, {} remaining",
            self.id,
            subs.len()
        );
    }
}

impl FrameSource for Subscription {
    fn next_frame(&mut self) -> Result<Frame> {
        match self.receiver.recv() {
            Ok(Ok(frame)) => Ok(Arc::unwrap_or_clone(frame)),
            Ok(Err(reason)) => Err(MonitorError::Capture(reason)),
            Err(_) => Err(MonitorError::Capture("camera feed closed".to_string())),
        }
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

impl FrameFeed {
    pub fn start(session: Arc<dyn CameraSession>, capacity: usize) -> Self {
        let subscribers: Arc<RwLock<Vec<Subscriber>>> = Arc::new(RwLock::new(Vec::new()));
        let stop_signal = Arc::new(AtomicBool::new(false));

        let thread = {
            let session = Arc::clone(&session);
            let subscribers = Arc::clone(&subscribers);
            let stop_signal = Arc::clone(&stop_signal);
            std::thread::Builder::new()
                .name("camera-feed".to_string())
                .spawn(move || feed_loop(session, subscribers, stop_signal))
        };

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[FEED] could not spawn reader thread: {}", e);
                None
            }
        };

        Self {
            session,
            subscribers,
            next_subscriber_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            stop_signal,
            thread,
        }
    }

    pub fn subscribe(&self, name: &str) -> Subscription {
        let (sender, receiver) = flume::bounded(self.capacity);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);

        let mut subs = self.subscribers.write();
        subs.push(Subscriber {
            sender,
            drain: receiver.clone(),
            name: name.to_string(),
            id,
        });
        log::debug!("[FEED] {} subscribed as {}, {} total", name, id, subs.len());

        Subscription {
            receiver,
            id,
            resolution: self.session.resolution(),
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.session.resolution()
    }

    /// Stop the reader thread, release the device and disconnect subscribers.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.session.release();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("[FEED] reader thread panicked");
            }
        }
        self.subscribers.write().clear();
    }
}

impl Drop for FrameFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

fn feed_loop(
    session: Arc<dyn CameraSession>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    stop_signal: Arc<AtomicBool>,
) {
    log::debug!("[FEED] reader started");
    while !stop_signal.load(Ordering::SeqCst) {
        let delivery = match session.read_frame() {
            Ok(frame) => Ok(Arc::new(frame)),
            Err(e) => {
                if stop_signal.load(Ordering::SeqCst) {
                    break;
                }
                Err(e.to_string())
            }
        };
        let failed = delivery.is_err();

        for sub in subscribers.read().iter() {
            sub.deliver(delivery.clone());
        }

        if failed {
            std::thread::sleep(READ_ERROR_DELAY);
        }
    }
    log::debug!("[FEED] reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCamera;
    use image::{Rgb, RgbImage};

    fn sub_with_queue(capacity: usize) -> (Subscriber, Receiver<Delivery>) {
        let (sender, receiver) = flume::bounded(capacity);
        let sub = Subscriber {
            sender,
            drain: receiver.clone(),
            name: "test".to_string(),
            id: 1,
        };
        (sub, receiver)
    }

    fn tagged(value: u8) -> Delivery {
        Ok(Arc::new(RgbImage::from_pixel(1, 1, Rgb([value, 0, 0]))))
    }

    fn tag_of(delivery: Delivery) -> u8 {
        delivery.unwrap().get_pixel(0, 0)[0]
    }

    #[test]
    fn full_queue_drops_oldest() {
        let (sub, receiver) = sub_with_queue(2);
        sub.deliver(tagged(1));
        sub.deliver(tagged(2));
        sub.deliver(tagged(3));

        assert_eq!(tag_of(receiver.try_recv().unwrap()), 2);
        assert_eq!(tag_of(receiver.try_recv().unwrap()), 3);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn single_slot_keeps_latest() {
        let (sub, receiver) = sub_with_queue(1);
        for value in 0..10 {
            sub.deliver(tagged(value));
        }
        assert_eq!(tag_of(receiver.try_recv().unwrap()), 9);
    }

    #[test]
    fn every_subscriber_gets_frames() {
        let camera = Arc::new(ScriptedCamera::new(RgbImage::new(4, 4)));
        let mut feed = FrameFeed::start(camera.clone(), 1);
        let mut a = feed.subscribe("detector");
        let mut b = feed.subscribe("recorder");

        assert_eq!(feed.subscriber_count(), 2);
        assert!(a.next_frame().is_ok());
        assert!(b.next_frame().is_ok());
        assert_eq!(a.resolution(), (4, 4));

        feed.stop();
        assert!(camera.is_released());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let camera = Arc::new(ScriptedCamera::new(RgbImage::new(4, 4)));
        let feed = FrameFeed::start(camera, 1);
        let sub = feed.subscribe("detector");
        assert_eq!(feed.subscriber_count(), 1);
        drop(sub);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn read_failures_reach_subscribers() {
        let camera = Arc::new(ScriptedCamera::new(RgbImage::new(4, 4)));
        camera.fail_next(1_000_000);
        let mut feed = FrameFeed::start(camera, 1);
        let mut sub = feed.subscribe("detector");

        assert!(matches!(sub.next_frame(), Err(MonitorError::Capture(_))));
        feed.stop();
    }

    #[test]
    fn stop_disconnects_subscribers() {
        let camera = Arc::new(ScriptedCamera::new(RgbImage::new(4, 4)));
        let mut feed = FrameFeed::start(camera, 1);
        let mut sub = feed.subscribe("detector");
        feed.stop();

        // at most one buffered frame, then the closed feed
        let _ = sub.next_frame();
        assert!(sub.next_frame().is_err());
    }
}
