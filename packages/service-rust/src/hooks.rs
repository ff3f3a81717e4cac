//! Lifecycle hooks and the two policies used to run them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::warn;

type HookFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A zero-argument fallible action run around server start and stop.
#[derive(Clone)]
pub struct Hook(HookFn);

impl Hook {
    /// Wraps an async action. `f` is called once per run.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(f())
        }))
    }

    /// Wraps a synchronous action.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self(Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
            let f = Arc::clone(&f);
            Box::pin(async move { f() })
        }))
    }

    /// # Errors
    ///
    /// Returns whatever the action returns.
    pub async fn run(&self) -> anyhow::Result<()> {
        (self.0)().await
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

/// Runs hooks in order and stops at the first error.
///
/// # Errors
///
/// Returns the first hook error. Later hooks are not run.
pub async fn run_fail_fast(hooks: &[Hook]) -> anyhow::Result<()> {
    for hook in hooks {
        hook.run().await?;
    }
    Ok(())
}

/// Runs every hook regardless of failures.
///
/// Returns the error of the last failing hook, or `None` if all succeeded.
pub async fn run_best_effort(hooks: &[Hook]) -> Option<anyhow::Error> {
    let mut last = None;
    for hook in hooks {
        if let Err(e) = hook.run().await {
            warn!(error = %e, "hook failed");
            last = Some(e);
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn logging(log: &Arc<Mutex<Vec<String>>>, name: &'static str, fail: bool) -> Hook {
        let log = Arc::clone(log);
        Hook::from_fn(move || {
            log.lock().push(name.to_string());
            if fail {
                Err(anyhow::anyhow!("{name} failed"))
            } else {
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![
            logging(&log, "a", false),
            logging(&log, "b", true),
            logging(&log, "c", false),
        ];
        let err = run_fail_fast(&hooks).await.unwrap_err();
        assert_eq!(err.to_string(), "b failed");
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn best_effort_runs_all_and_keeps_last_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let hooks = vec![
            logging(&log, "a", true),
            logging(&log, "b", false),
            logging(&log, "c", true),
        ];
        let err = run_best_effort(&hooks).await.unwrap();
        assert_eq!(err.to_string(), "c failed");
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn async_hook_runs_each_time() {
        let count = Arc::new(Mutex::new(0u32));
        let c = Arc::clone(&count);
        let hook = Hook::new(move || {
            let c = Arc::clone(&c);
            async move {
                tokio::task::yield_now().await;
                *c.lock() += 1;
                Ok(())
            }
        });
        hook.run().await.unwrap();
        hook.run().await.unwrap();
        assert_eq!(*count.lock(), 2);
        assert!(run_best_effort(&[]).await.is_none());
    }
}
