//! Real-time scheduling priority for the audio engine thread.
//!
//! An ambient OS-facing concern carried alongside the engine regardless of
//! which control-socket features are in scope.

/// Elevates the calling thread's scheduling priority. Implementations must
/// never panic: a failure to elevate priority is not fatal to starting the
/// engine, only to its latency guarantees, so callers log and continue.
pub trait RtPriority: Send {
    /// Attempt `SCHED_FIFO` at `priority` (1-99); on failure, fall back to
    /// a less-negative nice value. Returns `Ok(())` if either succeeded.
    fn elevate(&self, priority: i32) -> std::io::Result<()>;
}

#[cfg(target_os = "linux")]
pub struct LinuxRtPriority;

#[cfg(target_os = "linux")]
impl RtPriority for LinuxRtPriority {
    fn elevate(&self, priority: i32) -> std::io::Result<()> {
        // SAFETY: `sched_param` is a plain-old-data struct matching the
        // libc layout; `pthread_self()` returns a handle valid for the
        // calling thread only, and `sched_setscheduler` is called with it
        // and nothing else.
        #[allow(unsafe_code)]
        unsafe {
            let param = libc::sched_param {
                sched_priority: priority,
            };
            let rc = libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
            if rc == 0 {
                return Ok(());
            }
            tracing::warn!(
                error = %std::io::Error::last_os_error(),
                "SCHED_FIFO unavailable, falling back to nice"
            );
            let rc = libc::nice(-10);
            if rc == -1 && std::io::Error::last_os_error().raw_os_error() != Some(0) {
                tracing::warn!("failed to raise nice priority for audio engine thread");
            }
        }
        Ok(())
    }
}

/// No-op fallback for targets without `SCHED_FIFO`/`nice`.
#[derive(Default)]
pub struct NoopRtPriority;

impl RtPriority for NoopRtPriority {
    fn elevate(&self, _priority: i32) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
pub type DefaultRtPriority = NoopRtPriority;

#[cfg(target_os = "linux")]
pub type DefaultRtPriority = LinuxRtPriority;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_never_fails() {
        assert!(NoopRtPriority.elevate(50).is_ok());
    }
}
