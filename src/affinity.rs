//! CPU affinity for the real-time render thread.
//!
//! Binding the audio thread to fixed cores avoids underruns caused by the
//! scheduler migrating it onto a slower core. The binding is applied lazily on
//! the first buffer of each stream lifetime, since only then are we running on
//! the thread the runtime created.
//!
//! The policy is a single atomic tri-state:
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Disabled` | Never bind |
//! | `Pending` | Bind on the next buffer |
//! | `Applied` | Already bound for this stream lifetime |

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Which cores the render thread should run on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig
{
    /// Bind the render thread at all.
    pub enabled : bool,
    /// Core IDs to bind to. Empty means the core the thread first runs on.
    pub cpu_ids : Vec<usize>,
}

#[derive(Debug, Error)]
pub enum AffinityError
{
    #[error("cpu id {0} is out of range")]
    InvalidCpu(usize),
    #[error("could not determine the current cpu")]
    UnknownCpu,
    #[error("thread affinity is not supported on this platform")]
    Unsupported,
    #[error("failed to set thread affinity: {0}")]
    Os(#[from] std::io::Error),
}

/// Pins the calling thread to a set of cores.
pub trait ThreadBinder : Send + Sync
{
    /// The core the calling thread is running on right now.
    fn current_cpu(&self) -> Option<usize>;
    /// Restrict the calling thread to `cpu_ids`.
    fn bind_current_thread(&self, cpu_ids : &[usize]) -> Result<(), AffinityError>;
}

/// Operating system thread binder.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBinder;

#[cfg(any(target_os = "linux", target_os = "android"))]
impl ThreadBinder for SystemBinder
{
    fn current_cpu(&self) -> Option<usize>
    {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 { None } else { Some(cpu as usize) }
    }

    fn bind_current_thread(&self, cpu_ids : &[usize]) -> Result<(), AffinityError>
    {
        let mut cpu_set : libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe { libc::CPU_ZERO(&mut cpu_set) };
        for &cpu in cpu_ids
        {
            if cpu >= libc::CPU_SETSIZE as usize
            {
                return Err(AffinityError::InvalidCpu(cpu));
            }
            unsafe { libc::CPU_SET(cpu, &mut cpu_set) };
        }

        // pid 0 targets the calling thread.
        let result = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpu_set) };
        if result == 0 { Ok(()) } else { Err(AffinityError::Os(std::io::Error::last_os_error())) }
    }
}

#[cfg(target_os = "windows")]
impl ThreadBinder for SystemBinder
{
    fn current_cpu(&self) -> Option<usize>
    {
        let cpu = unsafe { windows::Win32::System::Threading::GetCurrentProcessorNumber() };
        Some(cpu as usize)
    }

    fn bind_current_thread(&self, cpu_ids : &[usize]) -> Result<(), AffinityError>
    {
        use windows::Win32::System::Threading::{GetCurrentThread, SetThreadAffinityMask};

        let mut mask = 0usize;
        for &cpu in cpu_ids
        {
            if cpu >= usize::BITS as usize
            {
                return Err(AffinityError::InvalidCpu(cpu));
            }
            mask |= 1 << cpu;
        }

        let previous = unsafe { SetThreadAffinityMask(GetCurrentThread(), mask) };
        if previous != 0 { Ok(()) } else { Err(AffinityError::Os(std::io::Error::last_os_error())) }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "windows")))]
impl ThreadBinder for SystemBinder
{
    fn current_cpu(&self) -> Option<usize> { None }

    fn bind_current_thread(&self, _cpu_ids : &[usize]) -> Result<(), AffinityError>
    {
        Err(AffinityError::Unsupported)
    }
}

/// Binding state for the current stream lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AffinityState
{
    Disabled = 0,
    Pending = 1,
    Applied = 2,
}

impl AffinityState
{
    fn from_u8(value : u8) -> Self
    {
        match value
        {
            1 => AffinityState::Pending,
            2 => AffinityState::Applied,
            _ => AffinityState::Disabled,
        }
    }
}

/// Once-per-stream CPU binding for the render thread.
pub struct AffinityPolicy
{
    state : AtomicU8,
    cpu_ids : ArcSwap<Vec<usize>>,
    binder : Arc<dyn ThreadBinder>,
}

impl AffinityPolicy
{
    pub fn new(config : &AffinityConfig, binder : Arc<dyn ThreadBinder>) -> Self
    {
        let state = if config.enabled { AffinityState::Pending } else { AffinityState::Disabled };
        Self
        {
            state: AtomicU8::new(state as u8),
            cpu_ids: ArcSwap::from_pointee(config.cpu_ids.clone()),
            binder,
        }
    }

    pub fn state(&self) -> AffinityState { AffinityState::from_u8(self.state.load(Ordering::Acquire)) }

    pub fn is_enabled(&self) -> bool { self.state() != AffinityState::Disabled }

    /// Enable or disable binding. Enabling does not rebind a thread that is already bound.
    pub fn set_enabled(&self, enabled : bool)
    {
        if enabled
        {
            let _ = self.state.compare_exchange(
                AffinityState::Disabled as u8,
                AffinityState::Pending as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        else
        {
            self.state.store(AffinityState::Disabled as u8, Ordering::Release);
        }
    }

    /// Cores used by the next binding.
    pub fn set_cpu_ids(&self, cpu_ids : Vec<usize>) { self.cpu_ids.store(Arc::new(cpu_ids)); }

    pub fn cpu_ids(&self) -> Arc<Vec<usize>> { self.cpu_ids.load_full() }

    /// Arm the binding again for a new stream lifetime.
    pub fn reset(&self)
    {
        let _ = self.state.compare_exchange(
            AffinityState::Applied as u8,
            AffinityState::Pending as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Bind the calling thread if a binding is pending.
    ///
    /// Returns true when this call performed the binding. Only the caller that wins
    /// the `Pending -> Applied` transition touches the binder, so the syscall runs at
    /// most once per stream lifetime however many buffers race through here.
    pub fn apply_once(&self) -> bool
    {
        if self.state.load(Ordering::Acquire) != AffinityState::Pending as u8
        {
            return false;
        }
        if self.state.compare_exchange(
            AffinityState::Pending as u8,
            AffinityState::Applied as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ).is_err()
        {
            return false;
        }

        self.bind();
        true
    }

    fn bind(&self)
    {
        let configured = self.cpu_ids.load();
        let result = if configured.is_empty()
        {
            match self.binder.current_cpu()
            {
                Some(cpu) =>
                {
                    debug!(cpu, "binding render thread to current cpu");
                    self.binder.bind_current_thread(&[cpu])
                }
                None => Err(AffinityError::UnknownCpu),
            }
        }
        else
        {
            debug!(cpus = ?configured.as_slice(), "binding render thread to configured cpus");
            self.binder.bind_current_thread(&configured)
        };

        match result
        {
            Ok(()) => trace!("thread affinity set"),
            Err(e) => warn!(error = %e, "error setting thread affinity"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests
{
    use super::*;
    use parking_lot::Mutex;

    /// Records every binding request instead of touching the scheduler.
    #[derive(Default)]
    pub(crate) struct RecordingBinder
    {
        pub(crate) bindings : Mutex<Vec<Vec<usize>>>,
    }

    impl ThreadBinder for RecordingBinder
    {
        fn current_cpu(&self) -> Option<usize> { Some(3) }

        fn bind_current_thread(&self, cpu_ids : &[usize]) -> Result<(), AffinityError>
        {
            self.bindings.lock().push(cpu_ids.to_vec());
            Ok(())
        }
    }

    fn policy(enabled : bool, cpu_ids : Vec<usize>) -> (AffinityPolicy, Arc<RecordingBinder>)
    {
        let binder = Arc::new(RecordingBinder::default());
        let config = AffinityConfig { enabled, cpu_ids };
        (AffinityPolicy::new(&config, binder.clone()), binder)
    }

    #[test]
    fn disabled_policy_never_binds()
    {
        let (policy, binder) = policy(false, vec![0, 1]);
        assert_eq!(policy.state(), AffinityState::Disabled);
        assert!(!policy.apply_once());
        policy.reset();
        assert_eq!(policy.state(), AffinityState::Disabled);
        assert!(binder.bindings.lock().is_empty());
    }

    #[test]
    fn binds_once_per_lifetime()
    {
        let (policy, binder) = policy(true, vec![2, 5]);
        assert!(policy.apply_once());
        for _ in 0..10
        {
            assert!(!policy.apply_once());
        }
        assert_eq!(policy.state(), AffinityState::Applied);
        assert_eq!(*binder.bindings.lock(), vec![vec![2, 5]]);

        policy.reset();
        assert_eq!(policy.state(), AffinityState::Pending);
        assert!(policy.apply_once());
        assert_eq!(binder.bindings.lock().len(), 2);
    }

    #[test]
    fn empty_core_set_binds_to_current_cpu()
    {
        let (policy, binder) = policy(true, Vec::new());
        policy.apply_once();
        assert_eq!(*binder.bindings.lock(), vec![vec![3]]);
    }

    #[test]
    fn enabling_later_arms_the_binding()
    {
        let (policy, binder) = policy(false, Vec::new());
        policy.set_enabled(true);
        assert_eq!(policy.state(), AffinityState::Pending);
        assert!(policy.apply_once());

        // Already bound: enabling again keeps it applied.
        policy.set_enabled(true);
        assert_eq!(policy.state(), AffinityState::Applied);

        policy.set_enabled(false);
        policy.reset();
        assert!(!policy.apply_once());
        assert_eq!(binder.bindings.lock().len(), 1);
    }

    #[test]
    fn concurrent_buffers_bind_once()
    {
        let (policy, binder) = policy(true, vec![1]);
        let policy = Arc::new(policy);
        let handles : Vec<_> = (0..8)
            .map(|_|
            {
                let policy = policy.clone();
                std::thread::spawn(move || policy.apply_once())
            })
            .collect();
        let winners = handles.into_iter().filter_map(|h| h.join().ok()).filter(|&won| won).count();
        assert_eq!(winners, 1);
        assert_eq!(binder.bindings.lock().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_binder_reports_a_cpu()
    {
        assert!(SystemBinder.current_cpu().is_some());
    }
}
