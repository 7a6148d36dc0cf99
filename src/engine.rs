//! Synthesizer output engine.
//!
//! The engine is responsible for:
//!
//! - Creating the callback objects supplied when the output stream is opened
//! - Opening the playback stream, retrying while the device settles
//! - Creating the render source that renders inside the data callback
//! - Starting the playback stream
//! - Restarting the playback stream when the device disconnects
//!
//! # Example
//!
//! ```ignore
//! use mksynthesis::engine::Engine;
//!
//! let engine = Engine::new(4);
//! assert!(engine.start());
//! engine.note_on(3);
//! engine.note_off(3);
//! assert!(engine.stop());
//! ```
//!
//! # Thread Safety
//!
//! `start`, `stop` and `restart` are serialized behind a single lifecycle lock,
//! which is held for a whole transition including the pauses between retries.
//! A restart triggered by a disconnect on the runtime's error thread therefore
//! never interleaves with an explicit call from the control thread. Note and tap
//! events never take that lock; they go straight to the published source.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::affinity::{SystemBinder, ThreadBinder};
use crate::callback::RenderCallback;
use crate::config::EngineConfig;
use crate::disconnect::{DisconnectHandler, Restartable};
use crate::realtime::{DummyBackend, SampleFormat, Stream, StreamBackend, StreamBuilder, StreamState};
use crate::source::{synth_factory, RenderSource, SourceFactory, SourceSpec, Tappable};

/// Builder for an [`Engine`] with a custom backend, source or thread binder.
pub struct EngineBuilder
{
    config : EngineConfig,
    backend : Option<Arc<dyn StreamBackend>>,
    source_factory : Option<SourceFactory>,
    thread_binder : Option<Arc<dyn ThreadBinder>>,
}

impl EngineBuilder
{
    /// Stream runtime to open streams on. Defaults to [`DummyBackend`].
    pub fn backend(mut self, backend : Arc<dyn StreamBackend>) -> Self
    {
        self.backend = Some(backend);
        self
    }

    /// Source built for every opened stream. Defaults to the built-in synth.
    pub fn source_factory(mut self, factory : SourceFactory) -> Self
    {
        self.source_factory = Some(factory);
        self
    }

    /// Affinity primitive used on the render thread. Defaults to [`SystemBinder`].
    pub fn thread_binder(mut self, binder : Arc<dyn ThreadBinder>) -> Self
    {
        self.thread_binder = Some(binder);
        self
    }

    /// Build the engine and its callbacks. No stream is opened.
    pub fn build(self) -> Engine
    {
        let backend = self.backend.unwrap_or_else(|| Arc::new(DummyBackend::new()) as Arc<dyn StreamBackend>);
        let factory = self.source_factory.unwrap_or_else(synth_factory);
        let binder = self.thread_binder.unwrap_or_else(|| Arc::new(SystemBinder) as Arc<dyn ThreadBinder>);
        let config = self.config;

        let inner = Arc::new_cyclic(|weak : &Weak<EngineInner>|
        {
            // The error callback gets a non-owning handle back to us so it can restart the
            // stream when it is disconnected.
            let target : Weak<dyn Restartable> = weak.clone();
            EngineInner
            {
                data_callback: Arc::new(RenderCallback::with_binder(&config.affinity, binder)),
                error_callback: Arc::new(DisconnectHandler::new(target)),
                config,
                backend,
                factory,
                stream: Mutex::new(None),
                retired: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }
        });

        Engine { inner }
    }
}

struct EngineInner
{
    config : EngineConfig,
    backend : Arc<dyn StreamBackend>,
    factory : SourceFactory,
    data_callback : Arc<RenderCallback>,
    error_callback : Arc<DisconnectHandler>,
    stream : Mutex<Option<Box<dyn Stream>>>,
    /// Source replaced by the last publish, released once its stream is closed.
    retired : Mutex<Option<Arc<RenderSource>>>,
    /// Set under the `stream` lock when the owning [`Engine`] is dropped.
    shutting_down : AtomicBool,
}

impl EngineInner
{
    fn start(&self) -> bool
    {
        let mut stream = self.stream.lock();
        self.start_locked(&mut stream)
    }

    fn stop(&self) -> bool
    {
        let mut stream = self.stream.lock();
        self.stop_locked(&mut stream)
    }

    fn start_locked(&self, slot : &mut Option<Box<dyn Stream>>) -> bool
    {
        if slot.is_some()
        {
            warn!("start() called with a stream already open; closing it first");
            self.stop_locked(slot);
        }

        // The device can disconnect during open or between open and start, so give the
        // system a moment to settle and try again.
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts();
        for attempt in 1..=max_attempts
        {
            if attempt > 1
            {
                std::thread::sleep(retry.retry_delay);
            }
            if let Some(stream) = self.attempt_start(attempt)
            {
                info!(
                    attempt,
                    sample_rate = stream.sample_rate(),
                    channels = stream.channel_count(),
                    buffer_frames = stream.buffer_frames(),
                    "playback stream started"
                );
                *slot = Some(stream);
                return true;
            }
        }

        error!(attempts = max_attempts, "failed at starting the stream");
        false
    }

    fn attempt_start(&self, attempt : u32) -> Option<Box<dyn Stream>>
    {
        let opened = StreamBuilder::from_request(&self.config.stream)
            .set_format(SampleFormat::Float32)
            .set_data_callback(self.data_callback.clone())
            .set_error_callback(self.error_callback.clone())
            .open_stream(self.backend.as_ref());

        let mut stream = match opened
        {
            Ok(stream) => stream,
            Err(e) =>
            {
                warn!(attempt, error = %e, "failed attempt at creating the playback stream");
                return None;
            }
        };

        // The device may grant a different rate or channel count than requested.
        let spec = SourceSpec
        {
            sample_rate: stream.sample_rate(),
            channel_count: stream.channel_count(),
            num_signals: self.config.num_signals,
        };
        let source = (self.factory)(&spec);
        self.data_callback.reset();
        let previous = self.data_callback.set_source(source);
        *self.retired.lock() = previous;

        match stream.start()
        {
            Ok(()) => Some(stream),
            Err(e) =>
            {
                warn!(attempt, error = %e, "failed attempt at starting the playback stream");
                if let Err(e) = stream.close()
                {
                    warn!(error = %e, "failed to close unstarted stream");
                }
                None
            }
        }
    }

    fn stop_locked(&self, slot : &mut Option<Box<dyn Stream>>) -> bool
    {
        if let Some(mut stream) = slot.take()
        {
            if stream.state() != StreamState::Closed
            {
                if let Err(e) = stream.stop()
                {
                    debug!(error = %e, "error stopping stream");
                }
                if let Err(e) = stream.close()
                {
                    warn!(error = %e, "error closing stream");
                }
            }
        }
        // The audio thread is gone, so the last reader of the old source is too.
        self.retired.lock().take();
        true
    }

    fn tappable(&self) -> Option<Arc<dyn Tappable>>
    {
        let source = self.data_callback.source()?;
        source.as_tappable().cloned()
    }
}

impl Restartable for EngineInner
{
    fn restart(&self)
    {
        let mut stream = self.stream.lock();
        if self.shutting_down.load(Ordering::Acquire)
        {
            info!("engine dropped; not restarting");
            return;
        }
        self.stop_locked(&mut stream);
        if !self.start_locked(&mut stream)
        {
            error!("restart failed; engine left without an active stream");
        }
    }
}

/// Owns the output stream and the render source, and exposes the note/tap API.
pub struct Engine
{
    inner : Arc<EngineInner>,
}

impl Engine
{
    /// Engine offering `num_signals` notes, on the default backend.
    pub fn new(num_signals : usize) -> Self { Self::builder(EngineConfig::new(num_signals)).build() }

    /// Engine described by `config`, on the default backend.
    pub fn with_config(config : EngineConfig) -> Self { Self::builder(config).build() }

    /// Start building an engine with a custom backend, source factory or thread binder.
    pub fn builder(config : EngineConfig) -> EngineBuilder
    {
        EngineBuilder
        {
            config,
            backend: None,
            source_factory: None,
            thread_binder: None,
        }
    }

    /// Open and start the output stream.
    ///
    /// Makes up to `retry.max_retries + 1` attempts, pausing `retry.retry_delay`
    /// between them. Returns false, with nothing left open, if every attempt failed.
    pub fn start(&self) -> bool { self.inner.start() }

    /// Stop and close the output stream. Safe to call at any time; always returns true.
    pub fn stop(&self) -> bool { self.inner.stop() }

    /// Stop then start, as one uninterrupted transition.
    pub fn restart(&self) { self.inner.restart(); }

    /// Gate signal `note_index` on in the current source.
    pub fn note_on(&self, note_index : usize)
    {
        match self.inner.tappable()
        {
            Some(source) => source.note_on(note_index),
            None => debug!(note_index, "note_on without a tappable source"),
        }
    }

    /// Gate signal `note_index` off in the current source.
    pub fn note_off(&self, note_index : usize)
    {
        match self.inner.tappable()
        {
            Some(source) => source.note_off(note_index),
            None => debug!(note_index, "note_off without a tappable source"),
        }
    }

    /// Forward a tap down (`true`) or up (`false`) to the current source.
    pub fn tap(&self, is_down : bool)
    {
        match self.inner.tappable()
        {
            Some(source) => source.tap(is_down),
            None => debug!(is_down, "tap without a tappable source"),
        }
    }

    /// Whether a stream is open and delivering buffers.
    pub fn is_running(&self) -> bool { self.stream_state() == StreamState::Started }

    /// State of the owned stream; `Closed` when there is none.
    pub fn stream_state(&self) -> StreamState
    {
        self.inner.stream.lock()
            .as_ref()
            .map(|stream| stream.state())
            .unwrap_or(StreamState::Closed)
    }

    /// The data callback shared with the stream, e.g. to adjust CPU binding.
    pub fn render_callback(&self) -> &Arc<RenderCallback> { &self.inner.data_callback }

    /// Number of signals the source offers to `note_on`/`note_off`.
    pub fn num_signals(&self) -> usize { self.inner.config.num_signals }
}

impl Drop for Engine
{
    fn drop(&mut self)
    {
        // A disconnect already running on the error thread holds its own handle to
        // the internals; it must find the flag once it gets the lock.
        let mut stream = self.inner.stream.lock();
        self.inner.shutting_down.store(true, Ordering::Release);
        if stream.is_some()
        {
            error!("engine dropped without calling stop(); call stop() so stream resources are not leaked");
            self.inner.stop_locked(&mut stream);
        }
    }
}
