//! Real-time audio output streams.
//!
//! This module describes the stream runtime the engine drives: a backend opens
//! output streams, each stream owns a high-priority audio thread that pulls
//! buffers from a [`DataCallback`], and reports device loss through an
//! [`ErrorCallback`] on a separate thread.
//!
//! # Backends
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`DummyBackend`] | Thread-driven virtual device, paced like hardware |
//! | [`ScriptedBackend`] | Wraps another backend and injects open/start failures |
//!
//! # Audio Format
//!
//! Output samples are interleaved `f32` values in the range -1.0 to 1.0.
//!
//! # Callback Model
//!
//! ```ignore
//! use std::sync::Arc;
//! use mksynthesis::realtime::{CallbackResult, DataCallback, DummyBackend, StreamBuilder};
//!
//! struct Silence;
//!
//! impl DataCallback for Silence
//! {
//!     fn on_audio_ready(&self, output : &mut [f32], _num_frames : usize) -> CallbackResult
//!     {
//!         output.fill(0.0);
//!         CallbackResult::Continue
//!     }
//! }
//!
//! let backend = DummyBackend::new();
//! let mut stream = StreamBuilder::new()
//!     .set_data_callback(Arc::new(Silence))
//!     .open_stream(&backend)?;
//! stream.start()?;
//! ```

use std::fmt;
use std::sync::{Arc, atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering}};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

// ==========================================
// Enums
// ==========================================

/// Audio API backend specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Api
{
    /// Let the backend pick.
    #[default]
    Unspecified,
    /// Android AAudio.
    AAudio,
    /// Android OpenSL ES.
    OpenSLES,
    /// macOS CoreAudio.
    CoreAudio,
    /// Linux ALSA.
    Alsa,
    /// Windows WASAPI.
    Wasapi,
    /// Virtual device for testing (no audio).
    Dummy,
}

impl fmt::Display for Api
{
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self
        {
            Api::Unspecified => "Unspecified",
            Api::AAudio => "AAudio",
            Api::OpenSLES => "OpenSL ES",
            Api::CoreAudio => "CoreAudio",
            Api::Alsa => "ALSA",
            Api::Wasapi => "WASAPI",
            Api::Dummy => "Dummy",
        };
        write!(f, "{}", name)
    }
}

/// Audio sample format specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleFormat
{
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit floating point normalized between ±1.0.
    #[default]
    Float32,
}

impl fmt::Display for SampleFormat
{
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self
        {
            SampleFormat::Int16 => "i16",
            SampleFormat::Int32 => "i32",
            SampleFormat::Float32 => "f32",
        };
        write!(f, "{}", name)
    }
}

/// Whether the stream may share its device with other streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SharingMode
{
    /// Grab the device for exclusive use.
    #[default]
    Exclusive,
    /// Mix with other streams on the device.
    Shared,
}

/// Latency/power trade-off requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PerformanceMode
{
    /// No preference.
    None,
    /// Larger buffers, fewer wake-ups.
    PowerSaving,
    /// Smallest buffers the device supports.
    #[default]
    LowLatency,
}

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState
{
    Closed,
    Open,
    Started,
    Stopped,
    /// The device went away; the stream can only be closed.
    Disconnected,
}

impl fmt::Display for StreamState
{
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self
        {
            StreamState::Closed => "closed",
            StreamState::Open => "open",
            StreamState::Started => "started",
            StreamState::Stopped => "stopped",
            StreamState::Disconnected => "disconnected",
        };
        write!(f, "{}", name)
    }
}

/// Value returned by a [`DataCallback`] for every buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackResult
{
    /// Keep delivering buffers.
    Continue,
    /// Stop delivering buffers for this stream.
    Stop,
}

// ==========================================
// Structures
// ==========================================

/// Stream configuration a host asks for before a stream is opened.
///
/// The backend may grant a different sample rate, channel count or buffer size;
/// read the actual values back from the opened [`Stream`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRequest
{
    /// Required API. `Unspecified` accepts whatever the backend talks to.
    pub api : Api,
    /// Device sharing mode.
    pub sharing_mode : SharingMode,
    /// Performance mode.
    pub performance_mode : PerformanceMode,
    /// Sample rate hint in Hz.
    pub sample_rate : Option<u32>,
    /// Channel count hint.
    pub channel_count : Option<u16>,
    /// Buffer size hint in frames.
    pub buffer_frames : Option<usize>,
}

impl Default for StreamRequest
{
    fn default() -> Self
    {
        Self
        {
            api: Api::Unspecified,
            sharing_mode: SharingMode::Exclusive,
            performance_mode: PerformanceMode::LowLatency,
            sample_rate: None,
            channel_count: None,
            buffer_frames: None,
        }
    }
}

/// Information about an output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo
{
    /// Character string for device name.
    pub name : String,
    /// Maximum output channels supported.
    pub output_channels : u16,
    /// Supported sample rates.
    pub sample_rates : Vec<u32>,
    /// Preferred sample rate.
    pub preferred_sample_rate : u32,
    /// Native sample formats supported.
    pub native_formats : Vec<SampleFormat>,
}

impl Default for DeviceInfo
{
    fn default() -> Self
    {
        Self
        {
            name: String::from("Dummy Audio Device"),
            output_channels: 2,
            sample_rates: vec![44100, 48000, 96000],
            preferred_sample_rate: 48000,
            native_formats: vec![SampleFormat::Float32],
        }
    }
}

// ==========================================
// Error Types
// ==========================================

/// Stream runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError
{
    /// The request named an API the backend does not talk to.
    #[error("{requested} requested but the backend talks to {available}")]
    UnsupportedApi
    {
        requested : Api,
        available : Api,
    },
    /// The device exists but could not be opened right now.
    #[error("device unavailable: {0}")]
    Unavailable(String),
    /// Another stream holds the device exclusively.
    #[error("device busy: {0}")]
    DeviceBusy(String),
    /// A device in use was unexpectedly disconnected.
    #[error("device disconnected: {0}")]
    Disconnected(String),
    /// The device cannot deliver the requested format.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(SampleFormat),
    /// The builder was asked to open a stream without a data callback.
    #[error("no data callback was set")]
    MissingCallback,
    /// The operation is not valid in the stream's current state.
    #[error("invalid stream state: cannot {operation} a {state} stream")]
    InvalidState
    {
        operation : &'static str,
        state : StreamState,
    },
    /// A system driver error occurred.
    #[error("driver error: {0}")]
    Driver(String),
    /// The audio thread could not be spawned.
    #[error("thread error: {0}")]
    Thread(String),
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

// ==========================================
// Callback Traits
// ==========================================

/// Receives every output buffer on the real-time thread.
///
/// `output` holds `num_frames * channel_count` interleaved samples. Implementations
/// run under a hard deadline: no blocking, no locks shared with other threads,
/// no allocation.
pub trait DataCallback : Send + Sync
{
    fn on_audio_ready(&self, output : &mut [f32], num_frames : usize) -> CallbackResult;
}

/// Receives asynchronous stream errors on a runtime-owned thread.
///
/// Called after the stream has stopped delivering buffers, so the handler may
/// block, close the stream and open a new one.
pub trait ErrorCallback : Send + Sync
{
    fn on_error(&self, error : &StreamError);
}

// ==========================================
// Stream and Backend
// ==========================================

/// An opened output stream.
pub trait Stream : Send
{
    /// Current lifecycle state.
    fn state(&self) -> StreamState;
    /// Granted sample rate in Hz.
    fn sample_rate(&self) -> u32;
    /// Granted channel count.
    fn channel_count(&self) -> u16;
    /// Granted buffer size in frames.
    fn buffer_frames(&self) -> usize;
    /// Start delivering buffers to the data callback.
    fn start(&mut self) -> StreamResult<()>;
    /// Stop delivering buffers. Blocks until the audio thread is idle.
    fn stop(&mut self) -> StreamResult<()>;
    /// Release the device. The stream cannot be restarted afterwards.
    fn close(&mut self) -> StreamResult<()>;
}

/// Everything a backend needs to open a stream.
#[derive(Clone)]
pub struct StreamSettings
{
    pub api : Api,
    pub sharing_mode : SharingMode,
    pub performance_mode : PerformanceMode,
    pub format : SampleFormat,
    pub sample_rate : Option<u32>,
    pub channel_count : Option<u16>,
    pub buffer_frames : Option<usize>,
    pub data_callback : Arc<dyn DataCallback>,
    pub error_callback : Option<Arc<dyn ErrorCallback>>,
}

impl fmt::Debug for StreamSettings
{
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("StreamSettings")
            .field("api", &self.api)
            .field("sharing_mode", &self.sharing_mode)
            .field("performance_mode", &self.performance_mode)
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .field("channel_count", &self.channel_count)
            .field("buffer_frames", &self.buffer_frames)
            .field("has_error_callback", &self.error_callback.is_some())
            .finish()
    }
}

/// Opens output streams on some audio API.
pub trait StreamBackend : Send + Sync
{
    /// The API this backend talks to.
    fn api(&self) -> Api;
    /// Open a stream. The returned stream is in [`StreamState::Open`].
    fn open_stream(&self, settings : StreamSettings) -> StreamResult<Box<dyn Stream>>;
}

/// Fluent construction of [`StreamSettings`].
#[derive(Default)]
pub struct StreamBuilder
{
    api : Api,
    sharing_mode : SharingMode,
    performance_mode : PerformanceMode,
    format : SampleFormat,
    sample_rate : Option<u32>,
    channel_count : Option<u16>,
    buffer_frames : Option<usize>,
    data_callback : Option<Arc<dyn DataCallback>>,
    error_callback : Option<Arc<dyn ErrorCallback>>,
}

impl StreamBuilder
{
    /// Exclusive, low-latency, `f32` output with no callbacks.
    pub fn new() -> Self { Self::default() }

    /// Seed the builder from a host-level request.
    pub fn from_request(request : &StreamRequest) -> Self
    {
        Self::new()
            .set_api(request.api)
            .set_sharing_mode(request.sharing_mode)
            .set_performance_mode(request.performance_mode)
            .set_sample_rate(request.sample_rate)
            .set_channel_count(request.channel_count)
            .set_buffer_frames(request.buffer_frames)
    }

    pub fn set_api(mut self, api : Api) -> Self
    {
        self.api = api;
        self
    }

    pub fn set_sharing_mode(mut self, mode : SharingMode) -> Self
    {
        self.sharing_mode = mode;
        self
    }

    pub fn set_performance_mode(mut self, mode : PerformanceMode) -> Self
    {
        self.performance_mode = mode;
        self
    }

    pub fn set_format(mut self, format : SampleFormat) -> Self
    {
        self.format = format;
        self
    }

    pub fn set_sample_rate(mut self, sample_rate : Option<u32>) -> Self
    {
        self.sample_rate = sample_rate;
        self
    }

    pub fn set_channel_count(mut self, channel_count : Option<u16>) -> Self
    {
        self.channel_count = channel_count;
        self
    }

    pub fn set_buffer_frames(mut self, buffer_frames : Option<usize>) -> Self
    {
        self.buffer_frames = buffer_frames;
        self
    }

    pub fn set_data_callback(mut self, callback : Arc<dyn DataCallback>) -> Self
    {
        self.data_callback = Some(callback);
        self
    }

    pub fn set_error_callback(mut self, callback : Arc<dyn ErrorCallback>) -> Self
    {
        self.error_callback = Some(callback);
        self
    }

    /// Validate the settings and ask `backend` to open the stream.
    pub fn open_stream(self, backend : &dyn StreamBackend) -> StreamResult<Box<dyn Stream>>
    {
        let available = backend.api();
        if self.api != Api::Unspecified && self.api != available
        {
            return Err(StreamError::UnsupportedApi { requested: self.api, available });
        }
        let data_callback = self.data_callback.ok_or(StreamError::MissingCallback)?;
        backend.open_stream(StreamSettings
        {
            api: available,
            sharing_mode: self.sharing_mode,
            performance_mode: self.performance_mode,
            format: self.format,
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            buffer_frames: self.buffer_frames,
            data_callback,
            error_callback: self.error_callback,
        })
    }
}

// ==========================================
// Dummy Backend
// ==========================================

const DEFAULT_BUFFER_FRAMES : usize = 192;
const POWER_SAVING_BUFFER_FRAMES : usize = 1024;

struct DummyShared
{
    device_name : String,
    sharing_mode : SharingMode,
    sample_rate : u32,
    channel_count : u16,
    buffer_frames : usize,
    paced : bool,
    data_callback : Arc<dyn DataCallback>,
    error_callback : Option<Arc<dyn ErrorCallback>>,
    state : Mutex<StreamState>,
    running : AtomicBool,
    callbacks : AtomicU64,
}

impl DummyShared
{
    fn state(&self) -> StreamState { *self.state.lock() }
}

/// Virtual output device driven by a plain thread.
///
/// Each started stream spawns an audio thread that calls the data callback once
/// per buffer, sleeping for the buffer's duration between calls when paced.
/// [`DummyStreamControl::disconnect`] simulates device loss.
pub struct DummyBackend
{
    device : DeviceInfo,
    buffer_frames : usize,
    paced : bool,
    active : Mutex<Option<DummyStreamControl>>,
    opened : AtomicUsize,
}

impl Default for DummyBackend
{
    fn default() -> Self { Self::new() }
}

impl DummyBackend
{
    /// Backend exposing the default dummy device.
    pub fn new() -> Self { Self::with_device(DeviceInfo::default()) }

    /// Backend exposing `device`.
    pub fn with_device(device : DeviceInfo) -> Self
    {
        Self
        {
            device,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            paced: true,
            active: Mutex::new(None),
            opened: AtomicUsize::new(0),
        }
    }

    /// Deliver buffers back to back instead of at the device rate.
    pub fn unpaced(mut self) -> Self
    {
        self.paced = false;
        self
    }

    /// Information about the exposed device.
    pub fn device_info(&self) -> &DeviceInfo { &self.device }

    /// Control handle for the most recently opened stream, if it is not closed.
    pub fn active_stream(&self) -> Option<DummyStreamControl>
    {
        self.active.lock()
            .as_ref()
            .filter(|control| control.state() != StreamState::Closed)
            .cloned()
    }

    /// Number of streams opened successfully so far.
    pub fn opened_count(&self) -> usize { self.opened.load(Ordering::SeqCst) }
}

impl StreamBackend for DummyBackend
{
    fn api(&self) -> Api { Api::Dummy }

    fn open_stream(&self, settings : StreamSettings) -> StreamResult<Box<dyn Stream>>
    {
        if !self.device.native_formats.contains(&settings.format)
        {
            return Err(StreamError::UnsupportedFormat(settings.format));
        }

        let mut active = self.active.lock();
        if let Some(current) = active.as_ref()
        {
            let exclusive = settings.sharing_mode == SharingMode::Exclusive
                || current.shared.sharing_mode == SharingMode::Exclusive;
            if exclusive && current.state() != StreamState::Closed
            {
                return Err(StreamError::DeviceBusy(self.device.name.clone()));
            }
        }

        let sample_rate = settings.sample_rate
            .filter(|rate| self.device.sample_rates.contains(rate))
            .unwrap_or(self.device.preferred_sample_rate);
        let channel_count = settings.channel_count
            .filter(|&channels| channels > 0 && channels <= self.device.output_channels)
            .unwrap_or(self.device.output_channels);
        let buffer_frames = match (settings.buffer_frames, settings.performance_mode)
        {
            (Some(frames), _) if frames > 0 => frames,
            (_, PerformanceMode::PowerSaving) => POWER_SAVING_BUFFER_FRAMES,
            _ => self.buffer_frames,
        };

        let shared = Arc::new(DummyShared
        {
            device_name: self.device.name.clone(),
            sharing_mode: settings.sharing_mode,
            sample_rate,
            channel_count,
            buffer_frames,
            paced: self.paced,
            data_callback: settings.data_callback,
            error_callback: settings.error_callback,
            state: Mutex::new(StreamState::Open),
            running: AtomicBool::new(false),
            callbacks: AtomicU64::new(0),
        });
        *active = Some(DummyStreamControl { shared: shared.clone() });
        self.opened.fetch_add(1, Ordering::SeqCst);

        debug!(
            device = %self.device.name,
            sample_rate,
            channel_count,
            buffer_frames,
            "dummy stream opened"
        );
        Ok(Box::new(DummyStream { shared, thread_handle: None }))
    }
}

/// Stream opened by [`DummyBackend`].
pub struct DummyStream
{
    shared : Arc<DummyShared>,
    thread_handle : Option<JoinHandle<()>>,
}

impl DummyStream
{
    fn join_thread(&mut self)
    {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take()
        {
            if handle.join().is_err()
            {
                error!(device = %self.shared.device_name, "dummy audio thread panicked");
            }
        }
    }

    /// Audio processing thread.
    fn audio_thread(shared : Arc<DummyShared>)
    {
        let frames = shared.buffer_frames;
        let frame_duration = Duration::from_secs_f64(frames as f64 / shared.sample_rate as f64);
        let mut output = vec![0.0f32; frames * shared.channel_count as usize];

        while shared.running.load(Ordering::Acquire)
        {
            let result = shared.data_callback.on_audio_ready(&mut output, frames);
            shared.callbacks.fetch_add(1, Ordering::Relaxed);

            if result == CallbackResult::Stop
            {
                trace!(device = %shared.device_name, "data callback requested stop");
                shared.running.store(false, Ordering::Release);
                break;
            }

            if shared.paced
            {
                std::thread::sleep(frame_duration);
            }
        }

        let mut state = shared.state.lock();
        if *state == StreamState::Started
        {
            *state = StreamState::Stopped;
        }
    }
}

impl Stream for DummyStream
{
    fn state(&self) -> StreamState { self.shared.state() }

    fn sample_rate(&self) -> u32 { self.shared.sample_rate }

    fn channel_count(&self) -> u16 { self.shared.channel_count }

    fn buffer_frames(&self) -> usize { self.shared.buffer_frames }

    fn start(&mut self) -> StreamResult<()>
    {
        {
            let mut state = self.shared.state.lock();
            match *state
            {
                StreamState::Open | StreamState::Stopped => {}
                other => return Err(StreamError::InvalidState { operation: "start", state: other }),
            }
            *state = StreamState::Started;
        }

        // A stream stopped by its callback still has a finished thread to reap.
        self.join_thread();
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name(String::from("dummy-audio"))
            .spawn(move || Self::audio_thread(shared));

        match spawned
        {
            Ok(handle) =>
            {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Err(e) =>
            {
                self.shared.running.store(false, Ordering::SeqCst);
                *self.shared.state.lock() = StreamState::Stopped;
                Err(StreamError::Thread(e.to_string()))
            }
        }
    }

    fn stop(&mut self) -> StreamResult<()>
    {
        let state = self.state();
        if state == StreamState::Closed
        {
            return Err(StreamError::InvalidState { operation: "stop", state });
        }

        self.join_thread();

        let mut state = self.shared.state.lock();
        match *state
        {
            StreamState::Disconnected => Err(StreamError::Disconnected(self.shared.device_name.clone())),
            _ =>
            {
                *state = StreamState::Stopped;
                Ok(())
            }
        }
    }

    fn close(&mut self) -> StreamResult<()>
    {
        self.join_thread();
        *self.shared.state.lock() = StreamState::Closed;
        debug!(device = %self.shared.device_name, "dummy stream closed");
        Ok(())
    }
}

impl Drop for DummyStream
{
    fn drop(&mut self)
    {
        if self.state() != StreamState::Closed
        {
            let _ = self.close();
        }
    }
}

/// Test-side handle to a [`DummyStream`] that the backend keeps after opening it.
#[derive(Clone)]
pub struct DummyStreamControl
{
    shared : Arc<DummyShared>,
}

impl DummyStreamControl
{
    /// Current state of the stream.
    pub fn state(&self) -> StreamState { self.shared.state() }

    /// Number of buffers delivered to the data callback so far.
    pub fn callback_count(&self) -> u64 { self.shared.callbacks.load(Ordering::Relaxed) }

    pub fn sample_rate(&self) -> u32 { self.shared.sample_rate }

    pub fn channel_count(&self) -> u16 { self.shared.channel_count }

    /// Simulate the device going away.
    ///
    /// The audio thread stops, the stream moves to [`StreamState::Disconnected`] and
    /// the error callback, if any, is invoked on a fresh thread.
    pub fn disconnect(&self)
    {
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, StreamState::Closed | StreamState::Disconnected)
            {
                return;
            }
            *state = StreamState::Disconnected;
        }
        self.shared.running.store(false, Ordering::SeqCst);
        warn!(device = %self.shared.device_name, "dummy device disconnected");

        let Some(callback) = self.shared.error_callback.clone() else { return; };
        let error = StreamError::Disconnected(self.shared.device_name.clone());
        let spawned = std::thread::Builder::new()
            .name(String::from("dummy-audio-error"))
            .spawn(move || callback.on_error(&error));
        if let Err(e) = spawned
        {
            error!(error = %e, "failed to spawn error callback thread");
        }
    }
}

// ==========================================
// Scripted Backend
// ==========================================

/// Wraps a backend and makes the next opens or starts fail on demand.
pub struct ScriptedBackend
{
    inner : Arc<dyn StreamBackend>,
    open_failures : AtomicUsize,
    start_failures : Arc<AtomicUsize>,
    opens : AtomicUsize,
    starts : Arc<AtomicUsize>,
}

impl ScriptedBackend
{
    pub fn new(inner : Arc<dyn StreamBackend>) -> Self
    {
        Self
        {
            inner,
            open_failures: AtomicUsize::new(0),
            start_failures: Arc::new(AtomicUsize::new(0)),
            opens: AtomicUsize::new(0),
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next `count` open attempts.
    pub fn fail_next_opens(&self, count : usize) { self.open_failures.store(count, Ordering::SeqCst); }

    /// Fail the next `count` start attempts on streams this backend opens.
    pub fn fail_next_starts(&self, count : usize) { self.start_failures.store(count, Ordering::SeqCst); }

    /// Open attempts seen, including failed ones.
    pub fn open_attempts(&self) -> usize { self.opens.load(Ordering::SeqCst) }

    /// Successful starts.
    pub fn started_count(&self) -> usize { self.starts.load(Ordering::SeqCst) }
}

fn take_one(counter : &AtomicUsize) -> bool
{
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

impl StreamBackend for ScriptedBackend
{
    fn api(&self) -> Api { self.inner.api() }

    fn open_stream(&self, settings : StreamSettings) -> StreamResult<Box<dyn Stream>>
    {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.open_failures)
        {
            return Err(StreamError::Unavailable(String::from("scripted open failure")));
        }
        let inner = self.inner.open_stream(settings)?;
        Ok(Box::new(ScriptedStream
        {
            inner,
            start_failures: self.start_failures.clone(),
            starts: self.starts.clone(),
        }))
    }
}

struct ScriptedStream
{
    inner : Box<dyn Stream>,
    start_failures : Arc<AtomicUsize>,
    starts : Arc<AtomicUsize>,
}

impl Stream for ScriptedStream
{
    fn state(&self) -> StreamState { self.inner.state() }

    fn sample_rate(&self) -> u32 { self.inner.sample_rate() }

    fn channel_count(&self) -> u16 { self.inner.channel_count() }

    fn buffer_frames(&self) -> usize { self.inner.buffer_frames() }

    fn start(&mut self) -> StreamResult<()>
    {
        if take_one(&self.start_failures)
        {
            return Err(StreamError::Driver(String::from("scripted start failure")));
        }
        self.inner.start()?;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> StreamResult<()> { self.inner.stop() }

    fn close(&mut self) -> StreamResult<()> { self.inner.close() }
}
