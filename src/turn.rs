//! Turn-taking between speech output and speech capture.
//!
//! A turn is one guard utterance followed by one capture. Turns and
//! announcements run on background threads and serialise on a single
//! exclusive section, so the guard never talks over itself and never listens
//! while it is talking. The monitor loop only polls the busy flags (derived
//! from task handles) and drains the reply channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::listener::SpeechInput;
use crate::llm::ResponseGenerator;
use crate::tts::SpeechOutput;

const POLL: Duration = Duration::from_millis(10);

/// Outcome of one turn, delivered to the monitor loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub turn_id: u64,
    pub level: u8,
    /// What the guard said.
    pub said: String,
    /// What was heard back, `None` on silence or capture failure.
    pub heard: Option<String>,
}

/// Handle of at most one running task. Busy state is read off the handle.
#[derive(Clone, Default)]
struct TaskSlot(Arc<Mutex<Option<JoinHandle<()>>>>);

impl TaskSlot {
    fn is_active(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn spawn<F: FnOnce() + Send + 'static>(&self, name: &str, task: F) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            let _ = previous.join();
        }
        match thread::Builder::new().name(name.to_string()).spawn(task) {
            Ok(handle) => *slot = Some(handle),
            Err(e) => warn!("failed to spawn {} task: {}", name, e),
        }
    }

    fn wait_idle(&self) {
        while self.is_active() {
            thread::sleep(POLL);
        }
    }

    fn join(&self) {
        let handle = self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = handle {
            let _ = h.join();
        }
    }
}

/// Everything a background turn or announcement needs.
#[derive(Clone)]
struct Actuators {
    speech: Arc<dyn SpeechOutput>,
    input: Arc<dyn SpeechInput>,
    responder: Arc<dyn ResponseGenerator>,
    exclusive: Arc<Mutex<()>>,
    speaking: TaskSlot,
    listening: TaskSlot,
    stopping: Arc<AtomicBool>,
}

impl Actuators {
    fn wait_quiet(&self) {
        self.speaking.wait_idle();
        self.listening.wait_idle();
    }

    fn say(&self, text: String) {
        let speech = self.speech.clone();
        self.speaking.spawn("speak", move || {
            if let Err(e) = speech.speak(&text) {
                warn!("speech failed: {}", e);
            }
        });
    }

    fn run_announcement(&self, text: String) {
        let _turn = self.exclusive.lock().unwrap_or_else(|e| e.into_inner());
        self.wait_quiet();
        self.say(text);
        self.speaking.wait_idle();
    }

    fn run_turn(&self, turn_id: u64, input: Option<String>, level: u8, settle: Duration, timeout: Duration, tx: SyncSender<Reply>) {
        let _turn = self.exclusive.lock().unwrap_or_else(|e| e.into_inner());
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        let said = self.responder.respond(input.as_deref(), level);
        debug!(turn_id, level, "turn utterance ready");

        self.wait_quiet();
        self.say(said.clone());
        self.speaking.wait_idle();
        thread::sleep(settle);
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        let listener = self.input.clone();
        self.listening.spawn("listen", move || {
            let heard = match listener.listen(timeout) {
                Ok(heard) => heard,
                Err(e) => {
                    warn!("capture failed: {}", e);
                    None
                }
            };
            let reply = Reply {
                turn_id,
                level,
                said,
                heard,
            };
            match tx.try_send(reply) {
                Ok(()) => {}
                Err(TrySendError::Full(r)) => warn!(turn_id = r.turn_id, "reply slot full, dropping reply"),
                Err(TrySendError::Disconnected(_)) => debug!(turn_id, "reply receiver gone"),
            }
        });
        self.listening.wait_idle();
    }
}

pub struct TurnCoordinator {
    actuators: Actuators,
    settle: Duration,
    listen_timeout: Duration,
    turn_worker: Option<JoinHandle<()>>,
    overlapped_turns: Vec<JoinHandle<()>>,
    announcers: Vec<JoinHandle<()>>,
    reply_tx: SyncSender<Reply>,
    reply_rx: Receiver<Reply>,
    next_turn_id: u64,
    awaiting: Option<u64>,
    held: Option<Reply>,
}

impl TurnCoordinator {
    pub fn new(
        speech: Arc<dyn SpeechOutput>,
        input: Arc<dyn SpeechInput>,
        responder: Arc<dyn ResponseGenerator>,
        settle: Duration,
        listen_timeout: Duration,
    ) -> Self {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        Self {
            actuators: Actuators {
                speech,
                input,
                responder,
                exclusive: Arc::new(Mutex::new(())),
                speaking: TaskSlot::default(),
                listening: TaskSlot::default(),
                stopping: Arc::new(AtomicBool::new(false)),
            },
            settle,
            listen_timeout,
            turn_worker: None,
            overlapped_turns: Vec::new(),
            announcers: Vec::new(),
            reply_tx,
            reply_rx,
            next_turn_id: 0,
            awaiting: None,
            held: None,
        }
    }

    /// Speech is playing or an announcement is still queued.
    pub fn is_speaking(&mut self) -> bool {
        self.announcers.retain(|h| !h.is_finished());
        self.actuators.speaking.is_active() || !self.announcers.is_empty()
    }

    pub fn is_listening(&self) -> bool {
        self.actuators.listening.is_active()
    }

    pub fn turn_in_progress(&self) -> bool {
        self.turn_worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn is_busy(&mut self) -> bool {
        self.is_speaking() || self.is_listening() || self.turn_in_progress()
    }

    /// A turn was started and its reply has not been taken yet.
    pub fn awaiting_reply(&self) -> bool {
        self.awaiting.is_some()
    }

    /// Start a turn in the background. The caller must not start another
    /// until this one's reply has been taken or discarded.
    pub fn start_turn(&mut self, input: Option<String>, level: u8) -> u64 {
        self.drop_stale_replies();
        self.next_turn_id += 1;
        let turn_id = self.next_turn_id;
        if let Some(previous) = self.turn_worker.take() {
            if !previous.is_finished() {
                // The exclusive section still keeps the two apart.
                warn!(turn_id, "starting a turn while the previous one is still running");
                self.overlapped_turns.push(previous);
            }
        }
        self.overlapped_turns.retain(|h| !h.is_finished());

        let actuators = self.actuators.clone();
        let (settle, timeout) = (self.settle, self.listen_timeout);
        let tx = self.reply_tx.clone();
        info!(turn_id, level, "turn started");
        match thread::Builder::new()
            .name("turn".into())
            .spawn(move || actuators.run_turn(turn_id, input, level, settle, timeout, tx))
        {
            Ok(handle) => {
                self.turn_worker = Some(handle);
                self.awaiting = Some(turn_id);
            }
            Err(e) => warn!("failed to spawn turn: {}", e),
        }
        turn_id
    }

    /// Speak `text` without a capture, after any turn or announcement
    /// already in flight.
    pub fn announce(&mut self, text: &str) {
        let actuators = self.actuators.clone();
        let text = text.to_string();
        match thread::Builder::new()
            .name("announce".into())
            .spawn(move || actuators.run_announcement(text))
        {
            Ok(handle) => self.announcers.push(handle),
            Err(e) => warn!("failed to spawn announcement: {}", e),
        }
    }

    fn drop_stale_replies(&mut self) {
        loop {
            match self.reply_rx.try_recv() {
                Ok(reply) if Some(reply.turn_id) == self.awaiting => {
                    self.held = Some(reply);
                }
                Ok(stale) => debug!(turn_id = stale.turn_id, "discarding stale reply"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Reply of the awaited turn, once it has arrived and nothing is busy.
    /// Replies from abandoned turns are dropped here.
    pub fn try_take_reply(&mut self) -> Option<Reply> {
        self.drop_stale_replies();
        if self.held.is_some() && !self.is_busy() {
            self.awaiting = None;
            return self.held.take();
        }
        None
    }

    /// Forget the awaited turn; its reply will be dropped when it arrives.
    pub fn discard_replies(&mut self) {
        if let Some(turn_id) = self.awaiting.take() {
            debug!(turn_id, "abandoning turn");
        }
        self.held = None;
        while self.reply_rx.try_recv().is_ok() {}
    }

    /// Stop starting captures and wait for every background task to finish.
    /// Queued announcements are still spoken.
    pub fn shutdown(&mut self) {
        self.actuators.stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.turn_worker.take() {
            let _ = handle.join();
        }
        for handle in self.overlapped_turns.drain(..).chain(self.announcers.drain(..)) {
            let _ = handle.join();
        }
        self.actuators.speaking.join();
        self.actuators.listening.join();
        self.discard_replies();
        debug!("turn coordinator stopped");
    }
}

impl Drop for TurnCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
