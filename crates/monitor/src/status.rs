//! Session status and the small set of counters shared across pipeline threads.

use std::{
    fmt,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Idle,
    Recording,
    WaitingForTrigger,
    ToleranceError,
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusState::Idle => "idle",
            StatusState::Recording => "recording",
            StatusState::WaitingForTrigger => "waiting for trigger",
            StatusState::ToleranceError => "tolerance error",
        })
    }
}

/// Status line shown by the presentation surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub state: StatusState,
    pub detail: Option<String>,
}

impl Status {
    pub fn new(state: StatusState) -> Self {
        Self {
            state,
            detail: None,
        }
    }

    pub fn with_detail(state: StatusState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: Some(detail.into()),
        }
    }
}

/// Versioned status slot. Writers bump the version only on change so readers
/// can cheaply detect updates.
pub struct StatusCell {
    inner: Mutex<(Status, u64)>,
}

impl StatusCell {
    pub fn new(status: Status) -> Self {
        Self {
            inner: Mutex::new((status, 0)),
        }
    }

    /// Replace the status; returns whether it differed from the previous one.
    pub fn set(&self, status: Status) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.0 == status {
            return false;
        }
        guard.0 = status;
        guard.1 = guard.1.wrapping_add(1);
        true
    }

    pub fn snapshot(&self) -> (Status, u64) {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get(&self) -> Status {
        self.snapshot().0
    }
}

/// State mutated from more than one thread during a session.
pub struct SharedState {
    recording: AtomicBool,
    stop_requested: AtomicBool,
    frame_counter: AtomicU64,
    grab_failures: AtomicU64,
    sensor_connected: AtomicBool,
    status: StatusCell,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            recording: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            grab_failures: AtomicU64::new(0),
            sensor_connected: AtomicBool::new(false),
            status: StatusCell::new(Status::new(StatusState::Idle)),
        }
    }
}

impl SharedState {
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    /// Raised by the acquisition worker when the run signal drops; the owner
    /// of the session performs the actual stop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Returns the index of the frame just produced, starting at 1.
    pub fn next_frame_index(&self) -> u64 {
        self.frame_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn frames(&self) -> u64 {
        self.frame_counter.load(Ordering::SeqCst)
    }

    pub fn record_grab_failure(&self) -> u64 {
        self.grab_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn grab_failures(&self) -> u64 {
        self.grab_failures.load(Ordering::Relaxed)
    }

    /// Store the connection flag; returns whether it changed.
    pub fn set_sensor_connected(&self, connected: bool) -> bool {
        self.sensor_connected.swap(connected, Ordering::SeqCst) != connected
    }

    pub fn sensor_connected(&self) -> bool {
        self.sensor_connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> &StatusCell {
        &self.status
    }

    pub(crate) fn reset(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.frame_counter.store(0, Ordering::SeqCst);
        self.grab_failures.store(0, Ordering::Relaxed);
    }
}
