//! Notification channel from the emulator core to the host.
//!
//! Producers are the emulator thread and any state-changing API call;
//! the consumer is whoever owns the machine. Two delivery paths exist
//! side by side:
//!
//! - a bounded channel drained by polling [`MsgQueue::get_message`];
//! - registered listener callbacks, invoked synchronously inside
//!   [`MsgQueue::put_message`] on the producing thread. Listeners must
//!   not block.
//!
//! When the channel is full the oldest message is dropped, never the
//! newest: late listeners care about the current machine state.

use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::trace;

/// Channel capacity. Plenty for one host frame worth of events.
const QUEUE_CAPACITY: usize = 128;

/// Message kinds sent to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    PowerOn,
    PowerOff,
    Run,
    Pause,
    Reset,
    WarpOn,
    WarpOff,
    RomMissing,
    CpuJammed,
    BreakpointReached,
    WatchpointReached,
    SnapshotTaken,
    AutoSnapshotTaken,
    DiskInserted,
    DiskEjected,
    DriveLedOn,
    DriveLedOff,
    DriveMotorOn,
    DriveMotorOff,
    CartridgeAttached,
    CartridgeDetached,
}

/// A message with an optional payload word (e.g. a PC, a drive id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub msg: MsgType,
    pub data: u64,
}

type Callback = Box<dyn Fn(Message) + Send + Sync>;

/// The queue plus the listener registry.
pub struct MsgQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    /// Listener callbacks keyed by an opaque sender id.
    listeners: Mutex<Vec<(usize, Callback)>>,
}

impl MsgQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        Self {
            tx,
            rx,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback under a sender id. One id owns at most one
    /// callback; re-registering replaces it.
    pub fn add_listener<F>(&self, sender: usize, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().expect("listener registry poisoned");
        listeners.retain(|(id, _)| *id != sender);
        listeners.push((sender, Box::new(callback)));
    }

    /// Remove the callback registered under a sender id.
    pub fn remove_listener(&self, sender: usize) {
        let mut listeners = self.listeners.lock().expect("listener registry poisoned");
        listeners.retain(|(id, _)| *id != sender);
    }

    /// Post a message: enqueue for polling and deliver synchronously to
    /// all registered listeners.
    pub fn put_message(&self, msg: MsgType, data: u64) {
        let message = Message { msg, data };
        trace!("message: {msg:?} ({data})");

        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                // Evict the oldest entry and retry once
                let _ = self.rx.try_recv();
                let _ = self.tx.try_send(message);
            }
            Err(TrySendError::Disconnected(_)) => unreachable!("queue owns both endpoints"),
        }

        let listeners = self.listeners.lock().expect("listener registry poisoned");
        for (_, callback) in listeners.iter() {
            callback(message);
        }
    }

    /// Poll the next queued message.
    #[must_use]
    pub fn get_message(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Default for MsgQueue {
    fn default() -> Self {
        Self::new()
    }
}
