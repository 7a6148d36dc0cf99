//! Built-in synthesizer source.
//!
//! A bank of sine voices tuned chromatically upward from middle C, with A4 at
//! 432 Hz. Each voice is gated by `note_on`/`note_off`; `tap` gates every
//! voice at once. Gating ramps the voice amplitude linearly so it never clicks.
//!
//! All state is held in atomics (f32 stored as bits), so the control thread
//! can gate voices while the real-time thread renders without any lock.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::debug;

use crate::source::{Renderable, Tappable};

/// Tuning reference for A4 in Hz.
pub const A4_FREQUENCY : f32 = 432.0;
/// Semitones from C4 up to A4.
const C4_TO_A4_STEPS : i32 = 9;
/// Gate ramp duration in seconds.
const RAMP_SECONDS : f32 = 0.01;
/// Headroom applied to the voice mix.
const MASTER_GAIN : f32 = 0.5;

/// Frequency of the voice `steps` semitones above middle C.
pub fn note_frequency(steps : i32) -> f32
{
    A4_FREQUENCY * 2.0f32.powf((steps - C4_TO_A4_STEPS) as f32 / 12.0)
}

#[inline]
fn load_f32(atomic : &AtomicU32) -> f32 { f32::from_bits(atomic.load(Ordering::Relaxed)) }

#[inline]
fn store_f32(atomic : &AtomicU32, value : f32) { atomic.store(value.to_bits(), Ordering::Relaxed); }

struct Voice
{
    phase_increment : f32,
    phase : AtomicU32,
    amplitude : AtomicU32,
    gate : AtomicBool,
}

impl Voice
{
    fn new(frequency : f32, sample_rate : u32) -> Self
    {
        Self
        {
            phase_increment: frequency / sample_rate as f32,
            phase: AtomicU32::new(0.0f32.to_bits()),
            amplitude: AtomicU32::new(0.0f32.to_bits()),
            gate: AtomicBool::new(false),
        }
    }
}

/// Sine voice bank implementing both source capabilities.
pub struct Synth
{
    sample_rate : u32,
    channel_count : u16,
    ramp_step : f32,
    voices : Box<[Voice]>,
    tapped : AtomicBool,
}

impl Synth
{
    pub fn new(sample_rate : u32, channel_count : u16, num_signals : usize) -> Self
    {
        let sample_rate = sample_rate.max(1);
        let voices = (0..num_signals)
            .map(|index| Voice::new(note_frequency(index as i32), sample_rate))
            .collect();
        Self
        {
            sample_rate,
            channel_count: channel_count.max(1),
            ramp_step: 1.0 / (RAMP_SECONDS * sample_rate as f32).max(1.0),
            voices,
            tapped: AtomicBool::new(false),
        }
    }

    pub fn sample_rate(&self) -> u32 { self.sample_rate }

    pub fn channel_count(&self) -> u16 { self.channel_count }

    pub fn num_signals(&self) -> usize { self.voices.len() }

    /// Whether voice `index` is currently gated on.
    pub fn is_note_on(&self, index : usize) -> bool
    {
        self.voices.get(index).is_some_and(|voice| voice.gate.load(Ordering::Relaxed))
    }

    pub fn is_tapped(&self) -> bool { self.tapped.load(Ordering::Relaxed) }

    fn set_gate(&self, index : usize, on : bool)
    {
        match self.voices.get(index)
        {
            Some(voice) => voice.gate.store(on, Ordering::Relaxed),
            None => debug!(index, num_signals = self.voices.len(), "note index out of range"),
        }
    }
}

impl Renderable for Synth
{
    fn render_audio(&self, output : &mut [f32], num_frames : usize)
    {
        let channels = self.channel_count as usize;
        let frames = num_frames.min(output.len() / channels);
        let output = &mut output[..frames * channels];
        output.fill(0.0);

        let tapped = self.tapped.load(Ordering::Relaxed);
        let gain = if self.voices.is_empty() { 0.0 } else { MASTER_GAIN / self.voices.len() as f32 };

        for voice in self.voices.iter()
        {
            let target = if tapped || voice.gate.load(Ordering::Relaxed) { 1.0 } else { 0.0 };
            let mut amplitude = load_f32(&voice.amplitude);
            let mut phase = load_f32(&voice.phase);

            // Silent and staying silent: only keep the oscillator running.
            if amplitude == 0.0 && target == 0.0
            {
                phase = (phase + voice.phase_increment * frames as f32).fract();
                store_f32(&voice.phase, phase);
                continue;
            }

            for frame in output.chunks_exact_mut(channels)
            {
                if amplitude < target
                {
                    amplitude = (amplitude + self.ramp_step).min(target);
                }
                else if amplitude > target
                {
                    amplitude = (amplitude - self.ramp_step).max(target);
                }

                let sample = (phase * TAU).sin() * amplitude * gain;
                for out in frame.iter_mut()
                {
                    *out += sample;
                }

                phase += voice.phase_increment;
                if phase >= 1.0
                {
                    phase -= 1.0;
                }
            }

            store_f32(&voice.amplitude, amplitude);
            store_f32(&voice.phase, phase);
        }
    }
}

impl Tappable for Synth
{
    fn tap(&self, is_down : bool) { self.tapped.store(is_down, Ordering::Relaxed); }

    fn note_on(&self, note_index : usize) { self.set_gate(note_index, true); }

    fn note_off(&self, note_index : usize) { self.set_gate(note_index, false); }
}
