//! Real-time render trampoline.
//!
//! [`RenderCallback`] is installed as the stream's data callback. On every buffer
//! it applies the pending CPU binding (first buffer only), loads the currently
//! published [`RenderSource`] and asks it for exactly `num_frames` frames.
//!
//! The source slot is an [`ArcSwapOption`]: the control thread publishes a
//! fully built source, the real-time thread loads either the previous or the
//! new one without locking.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use no_denormals::no_denormals;
use tracing::{debug, error};

use crate::affinity::{AffinityConfig, AffinityPolicy, SystemBinder, ThreadBinder};
use crate::realtime::{CallbackResult, DataCallback};
use crate::source::RenderSource;

/// Data callback rendering from a swappable [`RenderSource`].
pub struct RenderCallback
{
    source : ArcSwapOption<RenderSource>,
    affinity : AffinityPolicy,
}

impl Default for RenderCallback
{
    fn default() -> Self { Self::new(&AffinityConfig::default()) }
}

impl RenderCallback
{
    /// Callback binding through the operating system scheduler.
    pub fn new(affinity : &AffinityConfig) -> Self { Self::with_binder(affinity, Arc::new(SystemBinder)) }

    pub fn with_binder(affinity : &AffinityConfig, binder : Arc<dyn ThreadBinder>) -> Self
    {
        Self
        {
            source: ArcSwapOption::empty(),
            affinity: AffinityPolicy::new(affinity, binder),
        }
    }

    /// Publish `source` to the real-time thread and hand back the one it replaces.
    ///
    /// The real-time thread may still be reading the previous source. Keep it alive
    /// on the calling thread until the stream is stopped, so it is never freed
    /// inside the audio callback.
    #[must_use = "dropping the previous source here may free it on the audio thread"]
    pub fn set_source(&self, source : RenderSource) -> Option<Arc<RenderSource>>
    {
        self.source.swap(Some(Arc::new(source)))
    }

    /// Remove the published source. Buffers rendered afterwards stop the stream.
    #[must_use = "dropping the previous source here may free it on the audio thread"]
    pub fn clear_source(&self) -> Option<Arc<RenderSource>> { self.source.swap(None) }

    /// The currently published source.
    pub fn source(&self) -> Option<Arc<RenderSource>> { self.source.load_full() }

    /// Reset the callback to its initial state for a new stream lifetime.
    pub fn reset(&self) { self.affinity.reset(); }

    pub fn affinity(&self) -> &AffinityPolicy { &self.affinity }

    /// Set the CPU IDs to bind the audio callback thread to.
    pub fn set_cpu_ids(&self, cpu_ids : Vec<usize>) { self.affinity.set_cpu_ids(cpu_ids); }

    /// Enable or disable binding the audio callback thread to specific CPU cores.
    ///
    /// With no CPU IDs set, the core the audio thread first runs on is used.
    pub fn set_thread_affinity_enabled(&self, enabled : bool)
    {
        self.affinity.set_enabled(enabled);
        debug!(enabled, "thread affinity enabled");
    }
}

impl DataCallback for RenderCallback
{
    fn on_audio_ready(&self, output : &mut [f32], num_frames : usize) -> CallbackResult
    {
        self.affinity.apply_once();

        let source = self.source.load();
        let Some(renderable) = (*source).as_ref().and_then(|source| source.as_renderable()) else
        {
            error!("renderable source not set");
            return CallbackResult::Stop;
        };

        no_denormals(|| renderable.render_audio(output, num_frames));
        CallbackResult::Continue
    }
}
