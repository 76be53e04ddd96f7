//! Continuous police-style siren rendered to the default output device.
//!
//! The waveform loops yelp → wail → yelp until stopped. Rendering happens in
//! the device callback; a dedicated thread owns the stream for its lifetime.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use crate::audio;
use crate::config::SirenConfig;
use crate::error::{GuardError, Result};

/// Audible alarm. `start` and `stop` are idempotent.
pub trait Alarm: Send + Sync {
    fn start(&self) -> Result<()>;
    fn stop(&self);
    fn is_playing(&self) -> bool;
}

const RAMP_SECS: f32 = 0.3;
const MAX_HARMONIC: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SirenMode {
    /// Fast alternation between two tones.
    Yelp,
    /// Slow sweep up and down.
    Wail,
}

/// Sample-by-sample siren generator.
pub struct SirenSynth {
    sample_rate: f32,
    volume: f32,
    sequence: [(SirenMode, f32); 3],
    mode_idx: usize,
    mode_pos: f32,
    t: f32,
    phase: f32,
    low: f32,
    high: f32,
    sweep_hz: f32,
    tremolo_hz: f32,
    tremolo_depth: f32,
    rng: StdRng,
}

impl SirenSynth {
    pub fn new(sample_rate: u32, volume: f32, loop_secs: f32) -> Self {
        Self::with_rng(sample_rate, volume, loop_secs, StdRng::from_entropy())
    }

    pub fn with_rng(sample_rate: u32, volume: f32, loop_secs: f32, rng: StdRng) -> Self {
        let mut synth = Self {
            sample_rate: sample_rate.max(1) as f32,
            volume: volume.clamp(0.0, 1.0),
            sequence: [
                (SirenMode::Yelp, loop_secs * 0.35),
                (SirenMode::Wail, loop_secs * 0.40),
                (SirenMode::Yelp, loop_secs * 0.25),
            ],
            mode_idx: 0,
            mode_pos: 0.0,
            t: 0.0,
            phase: 0.0,
            low: 0.0,
            high: 0.0,
            sweep_hz: 0.0,
            tremolo_hz: 0.0,
            tremolo_depth: 0.0,
            rng,
        };
        synth.configure_mode();
        synth
    }

    pub fn mode(&self) -> SirenMode {
        self.sequence[self.mode_idx].0
    }

    fn configure_mode(&mut self) {
        let r = &mut self.rng;
        match self.sequence[self.mode_idx].0 {
            SirenMode::Yelp => {
                self.low = 700.0 + r.gen_range(-20.0..20.0);
                self.high = 1200.0 + r.gen_range(-30.0..30.0);
                self.sweep_hz = 6.5 + r.gen_range(-0.5..0.5);
            }
            SirenMode::Wail => {
                self.low = 600.0 + r.gen_range(-30.0..30.0);
                self.high = 1400.0 + r.gen_range(-40.0..40.0);
                self.sweep_hz = 0.35 + r.gen_range(-0.05..0.05);
            }
        }
        self.tremolo_hz = 7.0 + r.gen_range(-1.0..1.0);
        self.tremolo_depth = 0.12 + r.gen_range(-0.03..0.03);
        self.mode_pos = 0.0;
    }

    fn envelope(&self) -> f32 {
        let dur = self.sequence[self.mode_idx].1;
        let ramp = RAMP_SECS.min(dur / 2.0);
        if ramp <= 0.0 {
            return 1.0;
        }
        if self.mode_pos < ramp {
            self.mode_pos / ramp
        } else if self.mode_pos > dur - ramp {
            ((dur - self.mode_pos) / ramp).max(0.0)
        } else {
            1.0
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let lfo = 0.5 * (1.0 + (2.0 * PI * self.sweep_hz * self.t).sin());
        let freq = self.low * (1.0 - lfo) + self.high * lfo;

        self.phase += 2.0 * PI * freq / self.sample_rate;
        if self.phase > 2.0 * PI {
            self.phase -= 2.0 * PI;
        }

        // Band-limited square: odd harmonics below Nyquist.
        let nyquist = self.sample_rate / 2.0;
        let mut wave = 0.0;
        let mut k = 1;
        while k <= MAX_HARMONIC && (k as f32) * freq < nyquist {
            wave += (k as f32 * self.phase).sin() / k as f32;
            k += 2;
        }
        wave *= 4.0 / PI * 0.85;

        let tremolo = 1.0
            - self.tremolo_depth * 0.5 * (1.0 + (2.0 * PI * self.tremolo_hz * self.t).sin());
        let sample = (wave * tremolo * self.envelope() * self.volume).clamp(-1.0, 1.0);

        let dt = 1.0 / self.sample_rate;
        self.t += dt;
        self.mode_pos += dt;
        if self.mode_pos >= self.sequence[self.mode_idx].1 {
            self.mode_idx = (self.mode_idx + 1) % self.sequence.len();
            self.configure_mode();
        }
        sample
    }
}

struct SirenWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`Alarm`] backed by [`SirenSynth`] on the default output device.
pub struct Siren {
    volume: f32,
    loop_secs: f32,
    worker: Mutex<Option<SirenWorker>>,
}

impl Siren {
    pub fn new(config: &SirenConfig) -> Self {
        Self {
            volume: config.volume,
            loop_secs: config.loop_secs,
            worker: Mutex::new(None),
        }
    }
}

impl Alarm for Siren {
    fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(w) = worker.as_ref() {
            if !w.handle.is_finished() {
                return Ok(());
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<std::result::Result<(), String>>();
        let (volume, loop_secs) = (self.volume, self.loop_secs);
        let thread_stop = stop.clone();

        let handle = thread::spawn(move || {
            let stream = audio::build_output_stream(move |rate| {
                let mut synth = SirenSynth::new(rate, volume, loop_secs);
                move || synth.next_sample()
            });
            match stream {
                Ok(_stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while !thread_stop.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(20));
                    }
                }
                Err(e) => {
                    error!("siren output failed: {:#}", e);
                    let _ = ready_tx.send(Err(format!("{:#}", e)));
                }
            }
        });

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(())) => {
                info!("\u{1f6a8} siren activated");
                *worker = Some(SirenWorker { stop, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(GuardError::Alarm(e))
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                Err(GuardError::Alarm("output device did not start".into()))
            }
        }
    }

    fn stop(&self) {
        let taken = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(w) = taken {
            w.stop.store(true, Ordering::SeqCst);
            let _ = w.handle.join();
            info!("\u{1f515} siren stopped");
        }
    }

    fn is_playing(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Siren {
    fn drop(&mut self) {
        self.stop();
    }
}

enum AlarmCommand {
    Start,
    Stop,
}

/// Runs alarm start/stop on a worker thread, in the order requested, so the
/// caller never blocks on the audio device.
pub struct AlarmController {
    tx: Option<mpsc::Sender<AlarmCommand>>,
    handle: Option<JoinHandle<()>>,
    requested_on: bool,
}

impl AlarmController {
    pub fn spawn(alarm: Arc<dyn Alarm>) -> Self {
        let (tx, rx) = mpsc::channel::<AlarmCommand>();
        let handle = thread::Builder::new()
            .name("alarm".into())
            .spawn(move || {
                for command in rx {
                    match command {
                        AlarmCommand::Start => {
                            if let Err(e) = alarm.start() {
                                error!("alarm start failed: {}", e);
                            }
                        }
                        AlarmCommand::Stop => alarm.stop(),
                    }
                }
                alarm.stop();
            })
            .map_err(|e| error!("failed to spawn alarm worker: {}", e))
            .ok();
        Self {
            tx: Some(tx),
            handle,
            requested_on: false,
        }
    }

    fn send(&self, command: AlarmCommand) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(command);
        }
    }

    pub fn start(&mut self) {
        if !self.requested_on {
            self.requested_on = true;
            self.send(AlarmCommand::Start);
        }
    }

    /// Safe to call when nothing is playing.
    pub fn stop(&mut self) {
        self.requested_on = false;
        self.send(AlarmCommand::Stop);
    }

    pub fn is_on(&self) -> bool {
        self.requested_on
    }

    /// Stop the alarm and wait for the worker to exit.
    pub fn shutdown(&mut self) {
        self.requested_on = false;
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AlarmController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth(loop_secs: f32) -> SirenSynth {
        SirenSynth::with_rng(8000, 0.8, loop_secs, StdRng::seed_from_u64(7))
    }

    #[test]
    fn samples_stay_in_range() {
        let mut s = synth(1.0);
        for _ in 0..16000 {
            let v = s.next_sample();
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn starts_silent_and_ramps_up() {
        let mut s = synth(7.0);
        assert!(s.next_sample().abs() < 1e-3);
        let peak = (0..8000).map(|_| s.next_sample().abs()).fold(0.0f32, f32::max);
        assert!(peak > 0.3);
    }

    #[test]
    fn cycles_through_modes() {
        let mut s = synth(1.0);
        assert_eq!(s.mode(), SirenMode::Yelp);
        for _ in 0..(8000.0 * 0.36) as usize {
            s.next_sample();
        }
        assert_eq!(s.mode(), SirenMode::Wail);
        for _ in 0..(8000.0 * 0.65) as usize {
            s.next_sample();
        }
        assert_eq!(s.mode(), SirenMode::Yelp);
    }

    #[derive(Default)]
    struct CountingAlarm {
        starts: std::sync::atomic::AtomicUsize,
        playing: AtomicBool,
    }

    impl Alarm for CountingAlarm {
        fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
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

    #[test]
    fn controller_applies_commands_in_order() {
        let alarm = Arc::new(CountingAlarm::default());
        let mut ctl = AlarmController::spawn(alarm.clone());
        ctl.stop();
        ctl.start();
        ctl.start();
        assert!(ctl.is_on());
        ctl.stop();
        ctl.stop();
        ctl.start();
        ctl.shutdown();
        assert_eq!(alarm.starts.load(Ordering::SeqCst), 2);
        assert!(!alarm.is_playing());
        assert!(!ctl.is_on());
    }

    #[test]
    fn stop_without_start_is_noop() {
        let siren = Siren::new(&SirenConfig::default());
        siren.stop();
        siren.stop();
        assert!(!siren.is_playing());
    }
}
