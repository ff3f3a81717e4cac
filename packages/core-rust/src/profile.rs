//! Profiler contract.

pub trait Profile: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if profiling cannot begin.
    fn start(&self) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if profile output cannot be flushed.
    fn stop(&self) -> anyhow::Result<()>;

    fn kind(&self) -> &'static str;
}

/// Profiler that does nothing.
#[derive(Debug, Default)]
pub struct NoopProfile;

impl Profile for NoopProfile {
    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "noop"
    }
}
