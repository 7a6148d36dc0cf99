//! Render sources: the capabilities a signal generator offers to the engine.
//!
//! A source is rendered on the real-time thread through [`Renderable`] and
//! controlled from the UI thread through [`Tappable`]. The two are independent;
//! a [`RenderSource`] handle is narrowed to whichever one the caller needs.

use std::fmt;
use std::sync::Arc;

use crate::synth::Synth;

/// Produces interleaved `f32` audio.
pub trait Renderable : Send + Sync
{
    /// Fill `output` with `num_frames` frames of interleaved samples.
    ///
    /// Called on the real-time thread; must not block or allocate.
    fn render_audio(&self, output : &mut [f32], num_frames : usize);
}

/// Accepts gesture and note events.
pub trait Tappable : Send + Sync
{
    fn tap(&self, is_down : bool);
    fn note_on(&self, note_index : usize);
    fn note_off(&self, note_index : usize);
}

/// Stream properties a source is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpec
{
    /// Granted sample rate in Hz.
    pub sample_rate : u32,
    /// Granted channel count.
    pub channel_count : u16,
    /// Number of independent signals (voices) the source should offer.
    pub num_signals : usize,
}

/// Shared handle to a source, narrowable to either capability.
#[derive(Clone)]
pub struct RenderSource
{
    renderable : Option<Arc<dyn Renderable>>,
    tappable : Option<Arc<dyn Tappable>>,
}

impl RenderSource
{
    /// Source offering both capabilities.
    pub fn new<S>(source : S) -> Self
    where
        S : Renderable + Tappable + 'static,
    {
        let source = Arc::new(source);
        Self { renderable: Some(source.clone()), tappable: Some(source) }
    }

    /// Source that can only be rendered.
    pub fn renderable_only<S>(source : S) -> Self
    where
        S : Renderable + 'static,
    {
        Self { renderable: Some(Arc::new(source)), tappable: None }
    }

    /// Assemble a handle from separately owned capabilities.
    pub fn from_parts(renderable : Option<Arc<dyn Renderable>>, tappable : Option<Arc<dyn Tappable>>) -> Self
    {
        Self { renderable, tappable }
    }

    pub fn as_renderable(&self) -> Option<&Arc<dyn Renderable>> { self.renderable.as_ref() }

    pub fn as_tappable(&self) -> Option<&Arc<dyn Tappable>> { self.tappable.as_ref() }
}

impl fmt::Debug for RenderSource
{
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("RenderSource")
            .field("renderable", &self.renderable.is_some())
            .field("tappable", &self.tappable.is_some())
            .finish()
    }
}

/// Builds a fresh source for every stream the engine opens.
pub type SourceFactory = Arc<dyn Fn(&SourceSpec) -> RenderSource + Send + Sync>;

/// Factory producing the built-in [`Synth`].
pub fn synth_factory() -> SourceFactory
{
    Arc::new(|spec : &SourceSpec| RenderSource::new(Synth::new(spec.sample_rate, spec.channel_count, spec.num_signals)))
}

#[cfg(test)]
mod tests
{
    use super::*;

    struct Constant(f32);

    impl Renderable for Constant
    {
        fn render_audio(&self, output : &mut [f32], num_frames : usize)
        {
            let len = num_frames.min(output.len());
            output[..len].fill(self.0);
        }
    }

    #[test]
    fn renderable_only_is_not_tappable()
    {
        let source = RenderSource::renderable_only(Constant(0.5));
        assert!(source.as_renderable().is_some());
        assert!(source.as_tappable().is_none());

        let mut buffer = [0.0f32; 4];
        source.as_renderable().unwrap().render_audio(&mut buffer, 4);
        assert_eq!(buffer, [0.5; 4]);
    }

    #[test]
    fn synth_factory_offers_both_capabilities()
    {
        let factory = synth_factory();
        let source = factory(&SourceSpec { sample_rate: 48000, channel_count: 2, num_signals: 4 });
        assert!(source.as_renderable().is_some());
        assert!(source.as_tappable().is_some());
        assert_eq!(format!("{:?}", source), "RenderSource { renderable: true, tappable: true }");
    }
}
