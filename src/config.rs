//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::affinity::AffinityConfig;
use crate::realtime::StreamRequest;

/// How `start()` retries a stream that fails to open or start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig
{
    /// Attempts after the first one.
    pub max_retries : u32,
    /// Pause between attempts, giving the system time to settle.
    pub retry_delay : Duration,
}

impl Default for RetryConfig
{
    fn default() -> Self
    {
        Self
        {
            max_retries: 3,
            retry_delay: Duration::from_millis(20),
        }
    }
}

impl RetryConfig
{
    /// Total attempts a single `start()` makes.
    pub fn max_attempts(&self) -> u32 { self.max_retries.saturating_add(1) }
}

/// Everything the engine needs besides its backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig
{
    /// Number of independent signals the source offers to `note_on`/`note_off`.
    pub num_signals : usize,
    /// Stream parameters requested from the backend.
    pub stream : StreamRequest,
    /// Render thread CPU binding.
    pub affinity : AffinityConfig,
    /// Open/start retry policy.
    pub retry : RetryConfig,
}

impl Default for EngineConfig
{
    fn default() -> Self
    {
        Self
        {
            num_signals: 1,
            stream: StreamRequest::default(),
            affinity: AffinityConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig
{
    pub fn new(num_signals : usize) -> Self
    {
        Self { num_signals, ..Self::default() }
    }
}
