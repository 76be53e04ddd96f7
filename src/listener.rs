//! Speech capture: wait for the intruder to start talking, record until they
//! pause, and transcribe the phrase.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::audio::{self, InputCapture, CAPTURE_RATE};
use crate::error::{GuardError, Result};
use crate::stt::{clean_transcript, SttEngine};

/// Blocking speech capture.
pub trait SpeechInput: Send + Sync {
    /// Wait up to `timeout` for speech to start, then return the transcribed
    /// phrase. `Ok(None)` means nothing intelligible was heard.
    fn listen(&self, timeout: Duration) -> Result<Option<String>>;
}

/// 32 ms at 16 kHz.
const WINDOW: usize = 512;
const CALIBRATION_SECS: f32 = 0.5;
const MIN_THRESHOLD: f32 = 0.01;
const AMBIENT_FACTOR: f32 = 3.0;
/// Consecutive loud windows before speech counts as started.
const ONSET_WINDOWS: u32 = 3;
const PAUSE_SECS: f32 = 0.8;
/// Windows kept from before the onset so the first syllable isn't clipped.
const PRE_ROLL_WINDOWS: usize = 8;

fn secs_to_windows(secs: f32) -> u32 {
    ((secs * CAPTURE_RATE as f32) / WINDOW as f32).ceil().max(1.0) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// No speech yet.
    Waiting,
    Speaking,
    /// Phrase complete (pause or phrase limit).
    Done,
}

/// Energy-based endpointing over fixed-size windows.
pub struct Endpointer {
    threshold: f32,
    onset_run: u32,
    silent_run: u32,
    pause_windows: u32,
    max_windows: u32,
    speech_windows: u32,
    state: EndpointState,
    pre_roll: Vec<Vec<f32>>,
    audio: Vec<f32>,
}

impl Endpointer {
    pub fn new(threshold: f32, phrase_limit: Duration) -> Self {
        Self {
            threshold,
            onset_run: 0,
            silent_run: 0,
            pause_windows: secs_to_windows(PAUSE_SECS),
            max_windows: secs_to_windows(phrase_limit.as_secs_f32()),
            speech_windows: 0,
            state: EndpointState::Waiting,
            pre_roll: Vec::new(),
            audio: Vec::new(),
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn feed(&mut self, window: &[f32]) -> EndpointState {
        let loud = audio::rms(window) >= self.threshold;
        match self.state {
            EndpointState::Waiting => {
                self.pre_roll.push(window.to_vec());
                if self.pre_roll.len() > PRE_ROLL_WINDOWS {
                    self.pre_roll.remove(0);
                }
                self.onset_run = if loud { self.onset_run + 1 } else { 0 };
                if self.onset_run >= ONSET_WINDOWS {
                    self.state = EndpointState::Speaking;
                    for w in self.pre_roll.drain(..) {
                        self.audio.extend_from_slice(&w);
                    }
                    self.speech_windows = ONSET_WINDOWS;
                }
            }
            EndpointState::Speaking => {
                self.audio.extend_from_slice(window);
                self.speech_windows += 1;
                self.silent_run = if loud { 0 } else { self.silent_run + 1 };
                if self.silent_run >= self.pause_windows || self.speech_windows >= self.max_windows {
                    self.state = EndpointState::Done;
                }
            }
            EndpointState::Done => {}
        }
        self.state
    }

    pub fn into_audio(self) -> Vec<f32> {
        self.audio
    }
}

/// Microphone listener. The input stream is opened per capture and closed
/// before returning, so nothing holds the device between turns.
pub struct SpeechListener {
    engine: Arc<dyn SttEngine>,
    phrase_limit: Duration,
}

impl SpeechListener {
    pub fn new(engine: Arc<dyn SttEngine>, phrase_limit: Duration) -> Self {
        Self {
            engine,
            phrase_limit,
        }
    }

    fn next_window(capture: &mut InputCapture, window: &mut [f32], deadline: Instant) -> bool {
        while !capture.read_window(window) {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    fn calibrate(&self, capture: &mut InputCapture) -> f32 {
        let windows = secs_to_windows(CALIBRATION_SECS);
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut window = vec![0.0f32; WINDOW];
        let mut total = 0.0;
        let mut seen = 0u32;
        while seen < windows && Self::next_window(capture, &mut window, deadline) {
            total += audio::rms(&window);
            seen += 1;
        }
        let ambient = if seen == 0 { 0.0 } else { total / seen as f32 };
        let threshold = (ambient * AMBIENT_FACTOR).max(MIN_THRESHOLD);
        debug!(ambient, threshold, "calibrated");
        threshold
    }
}

impl SpeechInput for SpeechListener {
    fn listen(&self, timeout: Duration) -> Result<Option<String>> {
        let mut capture = InputCapture::open()
            .map_err(|e| GuardError::SpeechCapture(format!("{:#}", e)))?;
        let threshold = self.calibrate(&mut capture);
        capture.discard_buffered();

        info!("\u{1f3a4} listening...");
        let onset_deadline = Instant::now() + timeout;
        let hard_deadline = onset_deadline + self.phrase_limit;
        let mut endpointer = Endpointer::new(threshold, self.phrase_limit);
        let mut window = vec![0.0f32; WINDOW];

        loop {
            if !Self::next_window(&mut capture, &mut window, hard_deadline) {
                return Err(GuardError::SpeechCapture("microphone stopped delivering audio".into()));
            }
            match endpointer.feed(&window) {
                EndpointState::Waiting if Instant::now() >= onset_deadline => {
                    info!("no speech within {:?}", timeout);
                    return Ok(None);
                }
                EndpointState::Done => break,
                _ => {}
            }
        }
        drop(capture);

        let audio = endpointer.into_audio();
        debug!(secs = audio.len() as f32 / CAPTURE_RATE as f32, "phrase captured");
        let raw = self
            .engine
            .transcribe(&audio)
            .map_err(|e| GuardError::SpeechCapture(format!("transcription failed: {:#}", e)))?;
        let text = clean_transcript(&raw);
        match &text {
            Some(t) => info!("\u{1f464} \"{}\"", t),
            None => info!("speech not understood"),
        }
        Ok(text)
    }
}

/// Stand-in when no recogniser is available: every capture times out.
pub struct NoSpeechInput;

impl SpeechInput for NoSpeechInput {
    fn listen(&self, timeout: Duration) -> Result<Option<String>> {
        warn!("speech recognition unavailable, treating capture as silence");
        thread::sleep(timeout);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(amplitude: f32) -> Vec<f32> {
        (0..WINDOW)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn isolated_click_is_not_speech() {
        let mut ep = Endpointer::new(0.05, Duration::from_secs(10));
        ep.feed(&tone(0.5));
        ep.feed(&tone(0.0));
        ep.feed(&tone(0.5));
        ep.feed(&tone(0.5));
        assert_eq!(ep.feed(&tone(0.0)), EndpointState::Waiting);
    }

    #[test]
    fn phrase_ends_on_pause() {
        let mut ep = Endpointer::new(0.05, Duration::from_secs(10));
        for _ in 0..ONSET_WINDOWS {
            ep.feed(&tone(0.3));
        }
        assert_eq!(ep.state(), EndpointState::Speaking);
        for _ in 0..10 {
            ep.feed(&tone(0.3));
        }
        let pause = secs_to_windows(PAUSE_SECS);
        for _ in 0..pause - 1 {
            assert_eq!(ep.feed(&tone(0.0)), EndpointState::Speaking);
        }
        assert_eq!(ep.feed(&tone(0.0)), EndpointState::Done);
        let audio = ep.into_audio();
        assert_eq!(audio.len(), (ONSET_WINDOWS as usize + 10 + pause as usize) * WINDOW);
    }

    #[test]
    fn phrase_limit_caps_capture() {
        let mut ep = Endpointer::new(0.05, Duration::from_secs(1));
        let mut fed = 0;
        while ep.feed(&tone(0.3)) != EndpointState::Done {
            fed += 1;
            assert!(fed < 100);
        }
        assert_eq!(fed + 1, secs_to_windows(1.0));
    }

    #[test]
    fn window_conversion() {
        assert_eq!(secs_to_windows(1.0), 32);
        assert_eq!(secs_to_windows(0.0), 1);
    }
}
