use crate::tracker::{PollOutcome, Tracker};
use crate::types::Marker;
use crate::{Result, TrackerError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Samples buffered before the poller starts dropping new ones.
pub const SAMPLE_CAPACITY: usize = 16;

/// Marker poses after one successful poll.
#[derive(Debug, Clone)]
pub struct TrackingSample {
    pub poll_index: u64,
    /// Host wall-clock time of the poll.
    pub timestamp: SystemTime,
    /// Every known marker, ordered by geometry ID.
    pub markers: Vec<Marker>,
}

/// Handle to a background poller thread.
pub struct TrackingStream {
    receiver: Receiver<TrackingSample>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TrackingStream {
    /// Start polling on a dedicated thread. The thread owns the tracker.
    pub(crate) fn start(tracker: Tracker, interval: Duration) -> Result<TrackingStream> {
        let (sender, receiver) = crossbeam_channel::bounded(SAMPLE_CAPACITY);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("atracsys-poll".into())
            .spawn(move || {
                poll_loop(tracker, interval, sender, stop_clone);
            })?;

        Ok(TrackingStream {
            receiver,
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Receive the next sample (blocks until available).
    pub fn recv(&self) -> Result<TrackingSample> {
        self.receiver.recv().map_err(|_| TrackerError::StreamStopped)
    }

    /// Try to receive a sample without blocking.
    pub fn try_recv(&self) -> Option<TrackingSample> {
        self.receiver.try_recv().ok()
    }

    /// Receive a sample with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<TrackingSample> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => TrackerError::Timeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => TrackerError::StreamStopped,
        })
    }

    /// Samples waiting to be received.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the poller is still running.
    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the poller and wait for its thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TrackingStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll until stopped. Each poll blocks for at most the tracker's frame
/// timeout, so the stop flag is seen within one timeout plus `interval`.
fn poll_loop(
    mut tracker: Tracker,
    interval: Duration,
    sender: Sender<TrackingSample>,
    stop_flag: Arc<AtomicBool>,
) {
    log::info!("Tracking poller started");

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("Tracking poller stopping (stop flag set)");
            break;
        }

        match tracker.poll() {
            Ok(PollOutcome::Updated(_)) => {
                let sample = TrackingSample {
                    poll_index: tracker.poll_index(),
                    timestamp: SystemTime::now(),
                    markers: tracker.markers().values().cloned().collect(),
                };
                if let Err(e) = sender.try_send(sample) {
                    match e {
                        crossbeam_channel::TrySendError::Full(_) => {
                            log::trace!("Tracking channel full, dropping sample");
                        }
                        crossbeam_channel::TrySendError::Disconnected(_) => {
                            log::info!("Tracking channel disconnected, stopping poller");
                            break;
                        }
                    }
                }
            }
            Ok(PollOutcome::NoMarkers) | Ok(PollOutcome::Overflow) => {}
            Err(TrackerError::Timeout) => continue,
            Err(TrackerError::NotTracking) => {
                log::error!("Tracking stopped underneath the poller");
                break;
            }
            Err(e) => {
                log::warn!("Could not load frame: {}", e);
            }
        }

        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    if let Err(e) = tracker.stop_tracking() {
        log::debug!("Stop tracking: {}", e);
    }
}
