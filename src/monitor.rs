//! The guard's control loop.
//!
//! One thread ticks at a fixed cadence: take the latest frame, classify it
//! every so often, debounce, drive the escalation state machine and dispatch
//! side effects. Speech, capture, alarm and notifications all run in the
//! background; the loop only polls their state and drains turn replies.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::activation::{self, ActivationMatcher};
use crate::alert_gate::{AlertDecision, AlertGate, AlertTrigger};
use crate::camera::{CaptureStore, FrameSource};
use crate::classifier::Classifier;
use crate::config::GuardConfig;
use crate::debounce::{DebounceEvent, Debouncer};
use crate::error::{ErrorKind, GuardError};
use crate::escalation::{EscalationState, Phase, Transition};
use crate::greet::{greeting, GreetedRegistry};
use crate::listener::SpeechInput;
use crate::llm::ResponseGenerator;
use crate::notifier::Notifier;
use crate::registry::IntruderRegistry;
use crate::session_log::SessionLog;
use crate::siren::{Alarm, AlarmController};
use crate::state::SessionState;
use crate::tts::SpeechOutput;
use crate::turn::{Reply, TurnCoordinator};
use crate::types::{ClassificationResult, Embedding, Frame, FrameSummary, IdentityKind};

pub const ACTIVATED_LINE: &str = "Guard mode activated. Monitoring your room now.";
pub const FINAL_WARNING_LINE: &str = "FINAL WARNING! AUTHORITIES NOTIFIED! ALARM ACTIVATED!";
pub const ROOM_CLEAR_LINE: &str = "Intruder has left. Alarm deactivated.";
pub const GOODBYE_LINE: &str = "Guard mode deactivated. Goodbye!";

/// The real-world pieces the loop drives.
pub struct Collaborators {
    pub camera: Box<dyn FrameSource>,
    pub classifier: Box<dyn Classifier>,
    pub speech: Arc<dyn SpeechOutput>,
    pub input: Arc<dyn SpeechInput>,
    pub responder: Arc<dyn ResponseGenerator>,
    pub alarm: Arc<dyn Alarm>,
    pub notifier: Arc<dyn Notifier>,
    pub registry: IntruderRegistry,
    pub captures: CaptureStore,
}

/// What is known about the intruder of the current incident.
#[derive(Default)]
struct Incident {
    /// Repeat-intruder id, or the id assigned at registration.
    intruder_id: Option<String>,
    /// Best image to attach to an alert.
    image: Option<PathBuf>,
    /// Most recent unknown face, kept for registration.
    unknown_face: Option<(Frame, Embedding)>,
    registered: bool,
}

pub struct Orchestrator {
    camera: Box<dyn FrameSource>,
    classifier: Box<dyn Classifier>,
    input: Arc<dyn SpeechInput>,
    notifier: Arc<dyn Notifier>,
    registry: IntruderRegistry,
    captures: CaptureStore,
    turns: TurnCoordinator,
    alarm: AlarmController,

    debouncer: Debouncer,
    escalation: EscalationState,
    alert_gate: AlertGate,
    greeted: GreetedRegistry,
    session: SessionState,
    log: SessionLog,
    incident: Incident,
    alarm_pending: bool,

    unknown_threshold: u32,
    tick: Duration,
    classify_every: Duration,
    last_classified: Option<Instant>,
    activation_phrase: String,
    activation_window: Duration,
    background: Vec<JoinHandle<()>>,
    status: String,
}

impl Orchestrator {
    pub fn new(config: &GuardConfig, parts: Collaborators) -> Self {
        let turns = TurnCoordinator::new(
            parts.speech,
            parts.input.clone(),
            parts.responder,
            config.settle_delay(),
            config.listen_timeout(),
        );
        Self {
            camera: parts.camera,
            classifier: parts.classifier,
            input: parts.input,
            notifier: parts.notifier,
            registry: parts.registry,
            captures: parts.captures,
            turns,
            alarm: AlarmController::spawn(parts.alarm),
            debouncer: Debouncer::new(config.recognition.unknown_streak, config.recognition.clear_frames),
            escalation: EscalationState::from_config(config),
            alert_gate: AlertGate::new(),
            greeted: GreetedRegistry::new(config.greet_window()),
            session: SessionState::new(),
            log: SessionLog::new(&config.session_log_path),
            incident: Incident::default(),
            alarm_pending: false,
            unknown_threshold: config.recognition.unknown_threshold,
            tick: config.tick(),
            classify_every: config.classification_interval(),
            last_classified: None,
            activation_phrase: config.activation.phrase.clone(),
            activation_window: Duration::from_secs(config.activation.listen_secs),
            background: Vec::new(),
            status: String::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.escalation.phase()
    }

    pub fn level(&self) -> u8 {
        self.escalation.level()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_log(&self) -> &SessionLog {
        &self.log
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn alarm_on(&self) -> bool {
        self.alarm.is_on()
    }

    pub fn is_busy(&mut self) -> bool {
        self.turns.is_busy()
    }

    /// Wait for the activation phrase (unless `skip`), then arm the guard.
    /// Returns false if shutdown was requested first.
    pub fn activate(&mut self, running: &AtomicBool, skip: bool) -> bool {
        if !skip {
            let matcher = ActivationMatcher::new(&self.activation_phrase);
            let activated = activation::wait_for_activation(
                self.input.as_ref(),
                &matcher,
                self.activation_window,
                running,
                &mut self.log,
            );
            if !activated {
                return false;
            }
        }
        self.session.activate_guard();
        self.turns.announce(ACTIVATED_LINE);
        true
    }

    /// Run until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        info!("\u{1f6e1}\u{fe0f} monitoring started");
        while running.load(Ordering::SeqCst) && self.session.guard_active() {
            self.tick(Instant::now());
            thread::sleep(self.tick);
        }
    }

    /// One loop iteration.
    pub fn tick(&mut self, now: Instant) {
        self.background.retain(|h| !h.is_finished());

        let Some(frame) = self.camera.latest_frame() else {
            debug!("no frame yet, skipping tick");
            return;
        };

        if self.classification_due(now) {
            self.last_classified = Some(now);
            match self.classifier.classify(&frame) {
                Ok(results) => self.handle_results(&frame, results, now),
                Err(e) => self.report_failure("classification", &e),
            }
        }

        if self.alarm_pending && !self.turns.is_speaking() {
            self.fire_alarm();
        }

        if let Some(reply) = self.turns.try_take_reply() {
            self.handle_reply(reply);
        }

        self.update_status();
    }

    fn classification_due(&mut self, now: Instant) -> bool {
        let elapsed = self
            .last_classified
            .map(|t| now.saturating_duration_since(t) >= self.classify_every)
            .unwrap_or(true);
        if !elapsed {
            return false;
        }
        // While alarmed the room keeps being watched even during speech.
        self.escalation.is_alarmed() || !(self.turns.is_speaking() || self.turns.is_listening())
    }

    fn handle_results(&mut self, frame: &Frame, results: Vec<ClassificationResult>, now: Instant) {
        for r in &results {
            match r.kind {
                IdentityKind::Trusted => {
                    if let Some(name) = &r.label {
                        self.log.log_recognition(name, r.confidence);
                    }
                }
                IdentityKind::Unknown => {
                    self.incident.unknown_face = Some((frame.clone(), r.embedding.clone()));
                }
                IdentityKind::RepeatIntruder => {}
            }
        }

        let summary = FrameSummary::from_results(&results);
        let event = self.debouncer.observe(summary, self.escalation.is_alarmed());
        if event == DebounceEvent::TrustedSeen {
            self.on_trusted(&results, now);
            return;
        }
        if let DebounceEvent::UnknownConfirmed(count) = event {
            self.save_evidence(frame);
            debug!(count, "unknown confirmed");
        }

        match self.escalation.on_event(event) {
            Transition::Tracking { unknown_count } => {
                self.session.detect_intruder();
                info!("\u{26a0}\u{fe0f} unknown person ({}/{})", unknown_count, self.unknown_threshold);
            }
            Transition::ConversationStarted { level } => {
                self.session.detect_intruder();
                self.session.start_conversation();
                info!(level, "\u{1f4ac} starting conversation");
                if !self.turns.awaiting_reply() {
                    self.turns.start_turn(None, level);
                }
            }
            Transition::RoomCleared => {
                self.end_incident();
                self.turns.announce(ROOM_CLEAR_LINE);
                return;
            }
            _ => {}
        }

        for r in results.iter().filter(|r| r.kind == IdentityKind::RepeatIntruder) {
            if let Some(id) = &r.intruder_id {
                self.on_repeat_intruder(id);
            }
        }
    }

    fn on_trusted(&mut self, results: &[ClassificationResult], now: Instant) {
        let names: Vec<String> = results
            .iter()
            .filter(|r| r.kind == IdentityKind::Trusted)
            .filter_map(|r| r.label.clone())
            .collect();

        match self.escalation.on_event(DebounceEvent::TrustedSeen) {
            Transition::TrustedOverride { was_alarmed: true } => {
                info!(names = ?names, "\u{2705} trusted person, alarm off");
                self.end_incident();
                for name in &names {
                    self.turns.announce(&format!("Welcome {}! Alarm deactivated.", name));
                }
            }
            Transition::TrustedOverride { was_alarmed: false } => {
                info!(names = ?names, "\u{2705} trusted person, standing down");
                self.end_incident();
                self.greet(&names, now);
            }
            _ => self.greet(&names, now),
        }
    }

    fn greet(&mut self, names: &[String], now: Instant) {
        for name in names {
            if self.greeted.should_greet(name, now) {
                let line = greeting(name);
                info!("\u{1f44b} {}", line);
                self.turns.announce(&line);
            }
        }
    }

    fn on_repeat_intruder(&mut self, id: &str) {
        if !self.escalation.in_incident() {
            return;
        }
        if let Transition::LevelRaised { level } = self.escalation.note_repeat_intruder() {
            info!(id, level, "\u{1f6a8} known intruder raised escalation");
        }
        if self.incident.intruder_id.is_none() {
            self.incident.intruder_id = Some(id.to_string());
        }

        if let AlertDecision::Notify { identity } =
            self.alert_gate.evaluate(Some(id), AlertTrigger::RepeatIntruderSeen)
        {
            info!(id = %identity, "\u{1f6a8} KNOWN INTRUDER");
            self.turns.announce(&format!("Alert! Known intruder {} detected!", identity));
            let image = self
                .registry
                .image_path(&identity)
                .map(Path::to_path_buf)
                .or_else(|| self.incident.image.clone());
            match image {
                Some(image) => {
                    let notifier = self.notifier.clone();
                    self.spawn_background("notify", move || {
                        notifier.send_repeat_intruder_alert(&identity, &image);
                    });
                }
                None => warn!(id = %identity, "no image for repeat intruder, alert not sent"),
            }
        }
    }

    fn save_evidence(&mut self, frame: &Frame) {
        match self.captures.save(frame) {
            Ok(path) => self.incident.image = Some(path),
            Err(e) => self.report_failure("evidence capture", &e),
        }
    }

    fn handle_reply(&mut self, reply: Reply) {
        self.log
            .log_conversation(reply.level, reply.heard.as_deref(), &reply.said);
        match &reply.heard {
            Some(text) => info!(turn = reply.turn_id, "intruder replied: \"{}\"", text),
            None => info!(turn = reply.turn_id, "no valid response"),
        }

        match self.escalation.on_reply(reply.heard.as_deref()) {
            Transition::NextTurn { level, hostile } => {
                if hostile {
                    info!(level, "hostile reply");
                }
                self.turns.start_turn(reply.heard, level);
            }
            Transition::AlarmArmed { level } => {
                info!(level, "\u{1f6a8} MAXIMUM ESCALATION");
                self.turns.announce(FINAL_WARNING_LINE);
                self.alarm_pending = true;
            }
            other => debug!(?other, "reply outside conversation ignored"),
        }
    }

    /// Start the alarm, register the intruder once and evaluate the alert.
    fn fire_alarm(&mut self) {
        self.alarm_pending = false;
        self.alarm.start();

        if self.incident.intruder_id.is_none() && !self.incident.registered {
            if let Some((frame, embedding)) = self.incident.unknown_face.take() {
                self.incident.registered = true;
                match self.registry.register(&frame, &embedding) {
                    Ok(record) => {
                        self.classifier.remember_intruder(&record.id, &record.embedding);
                        self.incident.intruder_id = Some(record.id);
                        self.incident.image = Some(record.image_path);
                    }
                    Err(e) => self.report_failure("intruder registration", &e),
                }
            }
        }

        let identity = self.incident.intruder_id.clone();
        let image = identity
            .as_deref()
            .and_then(|id| self.registry.image_path(id).map(Path::to_path_buf))
            .or_else(|| self.incident.image.clone());
        let deliverable = identity.filter(|_| image.is_some());

        match self
            .alert_gate
            .evaluate(deliverable.as_deref(), AlertTrigger::MaxEscalationReached)
        {
            AlertDecision::Notify { identity } => {
                let notifier = self.notifier.clone();
                let level = self.escalation.level();
                if let Some(image) = image {
                    self.spawn_background("notify", move || {
                        notifier.send_all_alerts(&identity, &image, level);
                    });
                }
            }
            AlertDecision::Suppressed => debug!("alert already sent this incident"),
            AlertDecision::NotDeliverable => {}
        }
    }

    /// Back to idle: alarm off, counters and per-incident state cleared.
    fn end_incident(&mut self) {
        self.alarm.stop();
        self.alarm_pending = false;
        self.turns.discard_replies();
        self.debouncer.reset();
        self.escalation.reset();
        self.alert_gate.clear();
        self.session.end_conversation();
        self.incident = Incident::default();
    }

    fn spawn_background<F: FnOnce() + Send + 'static>(&mut self, name: &str, task: F) {
        match thread::Builder::new().name(name.to_string()).spawn(task) {
            Ok(handle) => self.background.push(handle),
            Err(e) => warn!("failed to spawn {} task: {}", name, e),
        }
    }

    fn report_failure(&self, what: &str, err: &GuardError) {
        match err.kind() {
            ErrorKind::SensorUnavailable => debug!("{} skipped: {}", what, err),
            ErrorKind::ActuatorFailure | ErrorKind::Persistence => warn!("{} failed: {}", what, err),
            ErrorKind::Fatal => warn!("{} hit a fatal error: {}", what, err),
        }
    }

    fn update_status(&mut self) {
        let mut status = if self.alarm.is_on() {
            "SIREN ACTIVE".to_string()
        } else if matches!(self.escalation.phase(), Phase::Conversing | Phase::Alarmed) {
            format!("ALERT-L{}", self.escalation.level())
        } else {
            "MONITORING".to_string()
        };
        if self.turns.is_speaking() {
            status.push_str(" | SPEAKING");
        }
        if self.turns.is_listening() {
            status.push_str(" | LISTENING");
        }
        if status != self.status {
            info!(status = %status, "status");
            self.status = status;
        }
    }

    /// Log the session summary, save the log, say goodbye and shut down.
    pub fn deactivate(&mut self) {
        if let Some(uptime) = self.session.deactivate_guard() {
            info!("session ended after {:.1} minutes", uptime.as_secs_f32() / 60.0);
        }
        self.log.log_stats();
        if let Err(e) = self.log.save() {
            warn!("could not save session log: {}", e);
        }
        self.turns.announce(GOODBYE_LINE);
        self.shutdown();
    }

    /// Join every background task, then release the camera.
    pub fn shutdown(&mut self) {
        self.turns.shutdown();
        self.alarm.shutdown();
        for handle in self.background.drain(..) {
            let _ = handle.join();
        }
        self.camera.stop();
        info!("\u{1f44b} monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::notifier::DeliveryReport;
    use crate::turn::tests::{wait_until, Activity, FakeListener, FakeSpeaker, LevelResponder};
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct StillCamera {
        frame: Option<Frame>,
        stopped: Arc<AtomicBool>,
    }

    impl FrameSource for StillCamera {
        fn latest_frame(&self) -> Option<Frame> {
            self.frame.clone()
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    type Script = Arc<Mutex<VecDeque<Vec<ClassificationResult>>>>;

    struct ScriptedClassifier {
        script: Script,
        calls: Arc<AtomicUsize>,
        remembered: Arc<Mutex<Vec<String>>>,
    }

    impl Classifier for ScriptedClassifier {
        fn classify(&mut self, _frame: &Frame) -> Result<Vec<ClassificationResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
        }

        fn remember_intruder(&mut self, id: &str, _embedding: &Embedding) {
            self.remembered.lock().unwrap().push(id.to_string());
        }
    }

    struct RecordingAlarm {
        activity: Arc<Activity>,
        playing: AtomicBool,
    }

    impl Alarm for RecordingAlarm {
        fn start(&self) -> Result<()> {
            self.activity.log.lock().unwrap().push("alarm:start".into());
            self.playing.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.playing.store(false, Ordering::SeqCst);
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<(String, String, Option<u8>)>>,
    }

    impl RecordingNotifier {
        fn calls(&self) -> Vec<(String, String, Option<u8>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_repeat_intruder_alert(&self, id: &str, image: &Path) -> DeliveryReport {
            assert!(image.exists());
            self.calls.lock().unwrap().push(("repeat".into(), id.into(), None));
            DeliveryReport {
                email_ok: true,
                chat_ok: false,
            }
        }

        fn send_all_alerts(&self, id: &str, image: &Path, level: u8) -> DeliveryReport {
            assert!(image.exists());
            self.calls.lock().unwrap().push(("all".into(), id.into(), Some(level)));
            DeliveryReport {
                email_ok: true,
                chat_ok: true,
            }
        }
    }

    struct Harness {
        orch: Orchestrator,
        script: Script,
        calls: Arc<AtomicUsize>,
        remembered: Arc<Mutex<Vec<String>>>,
        activity: Arc<Activity>,
        alarm: Arc<RecordingAlarm>,
        notifier: Arc<RecordingNotifier>,
        camera_stopped: Arc<AtomicBool>,
        _dir: tempfile::TempDir,
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(8, 8))
    }

    fn unknown() -> Vec<ClassificationResult> {
        vec![ClassificationResult::unknown(Embedding(vec![0.5, 0.5]))]
    }

    fn trusted(name: &str) -> Vec<ClassificationResult> {
        vec![ClassificationResult::trusted(name, 0.8, Embedding(vec![0.0, 0.0]))]
    }

    fn repeat(id: &str) -> Vec<ClassificationResult> {
        vec![ClassificationResult::repeat_intruder(id, 0.7, Embedding(vec![1.0, 1.0]))]
    }

    impl Harness {
        fn build(with_frame: bool, known_intruder: bool, interval_ms: u64) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = GuardConfig::default();
            config.recognition.interval_ms = interval_ms;
            config.conversation.settle_ms = 1;
            config.conversation.timeout_secs = 1;
            config.session_log_path = dir.path().join("session.json");

            let mut registry = IntruderRegistry::open(&dir.path().join("db")).unwrap();
            if known_intruder {
                registry.register(&frame(), &Embedding(vec![1.0, 1.0])).unwrap();
            }

            let activity = Arc::new(Activity::default());
            let script: Script = Arc::default();
            let calls = Arc::new(AtomicUsize::new(0));
            let remembered = Arc::new(Mutex::new(Vec::new()));
            let alarm = Arc::new(RecordingAlarm {
                activity: activity.clone(),
                playing: AtomicBool::new(false),
            });
            let notifier = Arc::new(RecordingNotifier::default());
            let camera_stopped = Arc::new(AtomicBool::new(false));

            let parts = Collaborators {
                camera: Box::new(StillCamera {
                    frame: with_frame.then(frame),
                    stopped: camera_stopped.clone(),
                }),
                classifier: Box::new(ScriptedClassifier {
                    script: script.clone(),
                    calls: calls.clone(),
                    remembered: remembered.clone(),
                }),
                speech: Arc::new(FakeSpeaker {
                    activity: activity.clone(),
                    delay: Duration::from_millis(20),
                }),
                input: Arc::new(FakeListener {
                    activity: activity.clone(),
                    replies: Mutex::new(Vec::new()),
                    delay: Duration::from_millis(20),
                }),
                responder: Arc::new(LevelResponder),
                alarm: alarm.clone(),
                notifier: notifier.clone(),
                registry,
                captures: CaptureStore::new(&dir.path().join("captures")).unwrap(),
            };

            Self {
                orch: Orchestrator::new(&config, parts),
                script,
                calls,
                remembered,
                activity,
                alarm,
                notifier,
                camera_stopped,
                _dir: dir,
            }
        }

        fn new() -> Self {
            Self::build(true, false, 0)
        }

        /// Queue one classification result and tick until it is consumed.
        fn pass(&mut self, results: Vec<ClassificationResult>) {
            let before = self.calls.load(Ordering::SeqCst);
            self.script.lock().unwrap().push_back(results);
            let (orch, calls) = (&mut self.orch, &self.calls);
            assert!(wait_until(|| {
                orch.tick(Instant::now());
                calls.load(Ordering::SeqCst) > before
            }));
        }

        fn run_until(&mut self, mut cond: impl FnMut(&mut Orchestrator) -> bool) {
            let orch = &mut self.orch;
            assert!(wait_until(|| {
                orch.tick(Instant::now());
                cond(orch)
            }));
        }

        fn said(&self, prefix: &str) -> usize {
            self.activity
                .entries()
                .iter()
                .filter(|e| e.starts_with(&format!("say:{}", prefix)))
                .count()
        }

        fn reach_conversation(&mut self) {
            for _ in 0..6 {
                self.pass(unknown());
            }
            assert_eq!(self.orch.phase(), Phase::Conversing);
        }

        fn reach_alarm(&mut self) {
            self.reach_conversation();
            self.run_until(|o| o.alarm_on());
            let alarm = self.alarm.clone();
            assert!(wait_until(|| alarm.is_playing()));
            assert_eq!(self.orch.phase(), Phase::Alarmed);
        }
    }

    #[test]
    fn threshold_of_confirmed_unknowns_opens_conversation() {
        let mut h = Harness::new();
        h.pass(unknown());
        assert_eq!(h.orch.phase(), Phase::Idle);
        assert_eq!(h.orch.debouncer().counters().unknown_streak, 1);

        h.pass(unknown());
        assert_eq!(h.orch.phase(), Phase::Tracking { unknown_count: 1 });
        assert!(h.orch.session().intruder_detected());

        for _ in 0..3 {
            h.pass(unknown());
        }
        assert_eq!(h.orch.phase(), Phase::Tracking { unknown_count: 2 });
        assert!(!h.orch.turns.awaiting_reply());

        h.pass(unknown());
        assert_eq!(h.orch.phase(), Phase::Conversing);
        assert_eq!(h.orch.level(), 0);
        assert!(h.orch.session().conversation_active());
        assert!(h.orch.turns.awaiting_reply());
        assert!(h._dir.path().join("captures").read_dir().unwrap().next().is_some());
    }

    #[test]
    fn silence_escalates_to_alarm_after_final_warning() {
        let mut h = Harness::new();
        assert_eq!(h.orch.level(), 0);
        h.reach_alarm();
        assert_eq!(h.orch.level(), 3);

        let entries = h.activity.entries();
        let warning = entries.iter().position(|e| e == &format!("say:{}", FINAL_WARNING_LINE));
        let siren = entries.iter().position(|e| e == "alarm:start");
        assert!(warning.unwrap() < siren.unwrap());

        // Registered once, recognisable from now on, alerted once.
        assert_eq!(h.orch.registry.len(), 1);
        assert_eq!(*h.remembered.lock().unwrap(), vec!["INTRUDER_001".to_string()]);
        let notifier = h.notifier.clone();
        assert!(wait_until(|| notifier.calls().len() == 1));
        assert_eq!(
            notifier.calls()[0],
            ("all".to_string(), "INTRUDER_001".to_string(), Some(3))
        );

        let stats = h.orch.session_log().stats();
        assert_eq!(stats.conversation_turns, 3);
        assert_eq!(stats.levels_used.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(h.orch.status().starts_with("SIREN ACTIVE"));
    }

    #[test]
    fn room_clear_after_thirty_empty_passes() {
        let mut h = Harness::new();
        h.reach_alarm();

        // An unknown face restarts the clear streak.
        h.pass(unknown());
        for _ in 0..29 {
            h.pass(Vec::new());
        }
        assert_eq!(h.orch.phase(), Phase::Alarmed);
        h.pass(Vec::new());

        assert_eq!(h.orch.phase(), Phase::Idle);
        assert_eq!(h.orch.level(), 0);
        assert!(!h.orch.alarm_on());
        assert_eq!(h.orch.debouncer().counters(), Default::default());
        assert!(!h.orch.session().conversation_active());
        let alarm = h.alarm.clone();
        assert!(wait_until(|| !alarm.is_playing()));
        h.run_until(|o| !o.is_busy());
        assert_eq!(h.said(ROOM_CLEAR_LINE), 1);
    }

    #[test]
    fn trusted_person_disarms_alarm() {
        let mut h = Harness::new();
        h.reach_alarm();

        h.pass(trusted("Asha"));
        assert_eq!(h.orch.phase(), Phase::Idle);
        assert!(!h.orch.alarm_on());
        assert!(!h.orch.alert_gate.was_alerted("INTRUDER_001"));
        let alarm = h.alarm.clone();
        assert!(wait_until(|| !alarm.is_playing()));
        h.run_until(|o| !o.is_busy());
        assert_eq!(h.said("Welcome Asha! Alarm deactivated."), 1);
    }

    #[test]
    fn trusted_person_ends_tracking_and_resets_counts() {
        let mut h = Harness::new();
        h.pass(unknown());
        h.pass(unknown());
        assert_eq!(h.orch.phase(), Phase::Tracking { unknown_count: 1 });

        h.pass(trusted("Asha"));
        assert_eq!(h.orch.phase(), Phase::Idle);
        assert_eq!(h.orch.debouncer().counters().unknown_confirmed, 0);
        assert!(!h.orch.session().intruder_detected());
    }

    #[test]
    fn repeat_intruder_raises_level_and_alerts_once() {
        let mut h = Harness::build(true, true, 0);
        h.pass(unknown());
        h.pass(unknown());
        assert_eq!(h.orch.phase(), Phase::Tracking { unknown_count: 1 });

        h.pass(repeat("INTRUDER_001"));
        assert_eq!(h.orch.level(), 2);
        assert!(h.orch.alert_gate.was_alerted("INTRUDER_001"));
        let notifier = h.notifier.clone();
        assert!(wait_until(|| notifier.calls().len() == 1));
        assert_eq!(notifier.calls()[0].0, "repeat");

        h.pass(repeat("INTRUDER_001"));
        assert_eq!(h.orch.phase(), Phase::Tracking { unknown_count: 2 });
        assert_eq!(h.orch.level(), 2);

        // Conversation opens at the raised level; the alarm path neither
        // re-registers the known intruder nor alerts a second time.
        h.pass(unknown());
        h.pass(unknown());
        assert_eq!(h.orch.phase(), Phase::Conversing);
        assert_eq!(h.orch.level(), 2);
        h.run_until(|o| o.alarm_on());
        h.run_until(|o| !o.is_busy());
        assert_eq!(h.orch.registry.len(), 1);
        assert_eq!(notifier.calls().len(), 1);
        assert!(h.remembered.lock().unwrap().is_empty());
        assert_eq!(h.said("Alert! Known intruder INTRUDER_001 detected!"), 1);
    }

    #[test]
    fn alarm_sounds_when_registration_fails() {
        let mut h = Harness::new();
        let db = h._dir.path().join("db");
        std::fs::remove_dir_all(&db).unwrap();
        std::fs::write(&db, "not a directory").unwrap();

        h.reach_alarm();
        h.run_until(|o| !o.is_busy());
        assert_eq!(h.orch.phase(), Phase::Alarmed);
        assert!(h.orch.alarm_on());
        assert!(h.activity.entries().iter().any(|e| e == "alarm:start"));
        assert!(h.orch.registry.is_empty());
        assert!(h.remembered.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(50));
        assert!(h.notifier.calls().is_empty());
        assert!(h.orch.background.is_empty());
    }

    #[test]
    fn known_intruder_during_alarm_still_alerts_once() {
        let mut h = Harness::build(true, true, 0);
        h.reach_alarm();
        let notifier = h.notifier.clone();
        assert!(wait_until(|| notifier.calls().len() == 1));
        assert_eq!(notifier.calls()[0].1, "INTRUDER_002");

        h.pass(repeat("INTRUDER_001"));
        assert!(wait_until(|| notifier.calls().len() == 2));
        assert_eq!(
            notifier.calls()[1],
            ("repeat".to_string(), "INTRUDER_001".to_string(), None)
        );
        assert_eq!(h.orch.phase(), Phase::Alarmed);
        assert_eq!(h.orch.level(), 3);

        // Both identities are already alerted for this incident.
        h.pass(repeat("INTRUDER_001"));
        h.pass(repeat("INTRUDER_002"));
        h.run_until(|o| !o.is_busy());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(notifier.calls().len(), 2);
        assert_eq!(h.said("Alert! Known intruder INTRUDER_001 detected!"), 1);
    }

    #[test]
    fn trusted_people_are_greeted_once_per_window() {
        let mut h = Harness::new();
        h.pass(trusted("Asha"));
        h.pass(trusted("Asha"));
        h.run_until(|o| !o.is_busy());
        let greetings = h
            .activity
            .entries()
            .iter()
            .filter(|e| e.contains("Asha"))
            .count();
        assert_eq!(greetings, 1);
        assert_eq!(h.orch.phase(), Phase::Idle);
        assert!(h.orch.session_log().stats().avg_recognition_confidence.is_some());
    }

    #[test]
    fn tick_without_frame_is_skipped() {
        let mut h = Harness::build(false, false, 0);
        h.script.lock().unwrap().push_back(unknown());
        h.orch.tick(Instant::now());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn classification_runs_on_its_own_interval() {
        let mut h = Harness::build(true, false, 1000);
        let t0 = Instant::now();
        h.orch.tick(t0);
        h.orch.tick(t0 + Duration::from_millis(500));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        h.orch.tick(t0 + Duration::from_millis(1000));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.orch.status(), "MONITORING");
    }

    #[test]
    fn shutdown_releases_camera_last() {
        let mut h = Harness::new();
        h.orch.turns.announce("hello");
        h.orch.shutdown();
        assert!(h.camera_stopped.load(Ordering::SeqCst));
        assert_eq!(h.said("hello"), 1);
        assert!(!h.orch.is_busy());
    }
}
