//! Real-time synthesizer output engine based on Rust.
//! engine : stream lifecycle with open retries and restart on disconnect.
//! callback : real-time render callback with lazy CPU binding.
//! source : render source capabilities and the source factory.
//! synth : built-in sine voice bank used as the default source.
//! disconnect : restart of the engine after device loss.
//! affinity : one-shot CPU binding of the audio thread.
//! realtime : output stream runtime, dummy and scripted backends.
//! config : engine, retry and stream request settings.

//! # License
//! The library is offered under GPLv3.0 license for non-commercial use.
//! If you want to use mksynthesis for closed source project, please email to minjaekim@mkaudio.company for agreement and support.

/// includes thread affinity policy and the system binder.
pub mod affinity;
/// includes the real-time render callback.
pub mod callback;
/// includes engine configuration.
pub mod config;
/// includes the disconnect handler and the restart contract.
pub mod disconnect;
/// includes the synthesizer output engine.
pub mod engine;
/// includes output stream runtime and backends.
pub mod realtime;
/// includes render source capabilities.
pub mod source;
/// includes the built-in synthesizer.
pub mod synth;

pub use callback::RenderCallback;
pub use config::{EngineConfig, RetryConfig};
pub use engine::{Engine, EngineBuilder};
pub use source::{RenderSource, Renderable, SourceSpec, Tappable};
