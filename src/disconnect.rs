//! Recovery from device loss.
//!
//! When the output device goes away (for example headphones being unplugged),
//! the runtime reports it on its error thread. [`DisconnectHandler`] reacts by
//! restarting its owner, which reopens the stream on whatever device is now
//! the default.

use std::sync::Weak;

use tracing::{info, warn};

use crate::realtime::{ErrorCallback, StreamError};

/// Something that can tear down and rebuild its streams.
pub trait Restartable : Send + Sync
{
    fn restart(&self);
}

/// Error callback restarting its owner after a disconnect.
///
/// Holds a non-owning handle: a handler outliving its owner does nothing.
pub struct DisconnectHandler
{
    target : Weak<dyn Restartable>,
}

impl DisconnectHandler
{
    pub fn new(target : Weak<dyn Restartable>) -> Self { Self { target } }
}

impl ErrorCallback for DisconnectHandler
{
    fn on_error(&self, error : &StreamError)
    {
        if !matches!(error, StreamError::Disconnected(_))
        {
            warn!(error = %error, "stream error");
            return;
        }

        match self.target.upgrade()
        {
            Some(target) =>
            {
                info!(error = %error, "restarting after disconnect");
                target.restart();
            }
            None => warn!(error = %error, "disconnect after owner was dropped; not restarting"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Restartable for Counter
    {
        fn restart(&self) { self.0.fetch_add(1, Ordering::SeqCst); }
    }

    fn handler_for(counter : &Arc<Counter>) -> DisconnectHandler
    {
        let target : Arc<dyn Restartable> = counter.clone();
        DisconnectHandler::new(Arc::downgrade(&target))
    }

    #[test]
    fn restarts_on_disconnect()
    {
        let counter = Arc::new(Counter::default());
        let handler = handler_for(&counter);
        handler.on_error(&StreamError::Disconnected(String::from("speaker")));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_errors_do_not_restart()
    {
        let counter = Arc::new(Counter::default());
        let handler = handler_for(&counter);
        handler.on_error(&StreamError::Driver(String::from("glitch")));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_owner_is_ignored()
    {
        let counter = Arc::new(Counter::default());
        let handler = handler_for(&counter);
        drop(counter);
        handler.on_error(&StreamError::Disconnected(String::from("speaker")));
    }
}
