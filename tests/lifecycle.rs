//! Engine lifecycle tests against the dummy and scripted backends.

use std::sync::Arc;
use std::time::Duration;

use mksynthesis::realtime::{DummyBackend, ScriptedBackend, StreamState};
use mksynthesis::{Engine, EngineConfig, RetryConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing()
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_for(mut condition : impl FnMut() -> bool) -> bool
{
    for _ in 0..1000
    {
        if condition() { return true; }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn scripted_engine(num_signals : usize) -> (Engine, Arc<ScriptedBackend>, Arc<DummyBackend>)
{
    init_tracing();
    let mut config = EngineConfig::new(num_signals);
    config.retry = RetryConfig { max_retries: 3, retry_delay: Duration::from_millis(1) };
    let dummy = Arc::new(DummyBackend::new());
    let scripted = Arc::new(ScriptedBackend::new(dummy.clone()));
    let engine = Engine::builder(config).backend(scripted.clone()).build();
    (engine, scripted, dummy)
}

#[test]
fn start_survives_up_to_three_open_failures()
{
    for failures in 0..=3
    {
        let (engine, scripted, _dummy) = scripted_engine(2);
        scripted.fail_next_opens(failures);

        assert!(engine.start(), "start failed after {} open failures", failures);
        assert_eq!(scripted.open_attempts(), failures + 1);
        assert_eq!(scripted.started_count(), 1);
        assert!(engine.is_running());
        assert!(engine.stop());
    }
}

#[test]
fn start_gives_up_after_four_open_failures()
{
    let (engine, scripted, dummy) = scripted_engine(2);
    scripted.fail_next_opens(4);

    assert!(!engine.start());
    assert_eq!(scripted.open_attempts(), 4);
    assert_eq!(scripted.started_count(), 0);
    assert_eq!(engine.stream_state(), StreamState::Closed);
    assert!(dummy.active_stream().is_none());
}

#[test]
fn start_gives_up_after_four_start_failures_without_leaking()
{
    let (engine, scripted, dummy) = scripted_engine(2);
    scripted.fail_next_starts(10);

    assert!(!engine.start());
    assert_eq!(scripted.open_attempts(), 4);
    assert_eq!(dummy.opened_count(), 4);
    assert!(dummy.active_stream().is_none());
    assert!(!engine.is_running());
}

#[test]
fn stop_is_idempotent()
{
    init_tracing();
    let engine = Engine::new(1);
    assert!(engine.stop());
    assert!(engine.stop());

    assert!(engine.start());
    assert!(engine.stop());
    assert!(engine.stop());
    assert_eq!(engine.stream_state(), StreamState::Closed);
}

#[test]
fn end_to_end_note_and_tap()
{
    init_tracing();
    let engine = Engine::new(4);
    assert_eq!(engine.num_signals(), 4);

    assert!(engine.start());
    engine.note_on(3);
    engine.note_off(3);
    engine.tap(true);
    engine.tap(false);
    assert!(engine.stop());

    // A fresh lifecycle on the same engine.
    assert!(engine.start());
    assert!(engine.is_running());
    assert!(engine.stop());
}

#[test]
fn disconnect_restarts_on_a_new_stream()
{
    init_tracing();
    let dummy = Arc::new(DummyBackend::new());
    let engine = Engine::builder(EngineConfig::new(4)).backend(dummy.clone()).build();
    assert!(engine.start());
    let first_source = engine.render_callback().source().unwrap();

    dummy.active_stream().unwrap().disconnect();

    assert!(wait_for(|| dummy.opened_count() == 2 && engine.is_running()));
    let second_source = engine.render_callback().source().unwrap();
    assert!(!Arc::ptr_eq(&first_source, &second_source));

    let stream = dummy.active_stream().unwrap();
    assert!(wait_for(|| stream.callback_count() > 0));
    assert!(engine.stop());
}

#[test]
fn failed_restart_leaves_engine_stopped()
{
    let (engine, scripted, dummy) = scripted_engine(1);
    assert!(engine.start());

    scripted.fail_next_opens(4);
    dummy.active_stream().unwrap().disconnect();

    assert!(wait_for(|| scripted.open_attempts() == 5));
    assert!(wait_for(|| engine.stream_state() == StreamState::Closed));
    assert!(!engine.is_running());

    // An explicit start afterwards recovers.
    assert!(engine.start());
    assert!(engine.stop());
}

#[test]
fn explicit_restart_builds_a_fresh_source()
{
    let (engine, scripted, _dummy) = scripted_engine(2);
    assert!(engine.start());
    let before = engine.render_callback().source().unwrap();

    engine.restart();

    assert!(engine.is_running());
    assert_eq!(scripted.started_count(), 2);
    let after = engine.render_callback().source().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(engine.stop());
}

#[test]
fn disconnect_racing_drop_never_reopens()
{
    init_tracing();
    for _ in 0..20
    {
        let dummy = Arc::new(DummyBackend::new());
        let engine = Engine::builder(EngineConfig::new(2)).backend(dummy.clone()).build();
        assert!(engine.start());

        dummy.active_stream().unwrap().disconnect();
        drop(engine);

        let opened = dummy.opened_count();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(dummy.opened_count(), opened);
        assert!(dummy.active_stream().is_none());
    }
}

#[test]
fn concurrent_restart_and_stop_end_closed()
{
    let (engine, _scripted, dummy) = scripted_engine(2);
    assert!(engine.start());

    std::thread::scope(|scope|
    {
        for worker in 0..8
        {
            let engine = &engine;
            scope.spawn(move ||
            {
                for round in 0..20
                {
                    if (worker + round) % 2 == 0
                    {
                        engine.restart();
                    }
                    else
                    {
                        assert!(engine.stop());
                    }
                }
            });
        }
    });

    assert!(engine.stop());
    assert_eq!(engine.stream_state(), StreamState::Closed);
    assert!(dummy.active_stream().is_none());
}

#[test]
fn stop_waits_for_a_retrying_start()
{
    init_tracing();
    let mut config = EngineConfig::new(1);
    config.retry = RetryConfig { max_retries: 3, retry_delay: Duration::from_millis(40) };
    let dummy = Arc::new(DummyBackend::new());
    let scripted = Arc::new(ScriptedBackend::new(dummy.clone()));
    let engine = Engine::builder(config).backend(scripted.clone()).build();
    scripted.fail_next_opens(3);

    std::thread::scope(|scope|
    {
        let starter = scope.spawn(|| engine.start());

        // The first attempt has failed; start() is now sleeping before the next one.
        assert!(wait_for(|| scripted.open_attempts() >= 1));
        assert!(engine.stop());

        // stop() only got the lock once start() had finished all of its attempts.
        assert_eq!(scripted.open_attempts(), 4);
        assert_eq!(scripted.started_count(), 1);
        assert_eq!(engine.stream_state(), StreamState::Closed);
        assert!(dummy.active_stream().is_none());

        assert!(starter.join().unwrap());
    });
}
