//! The service lifecycle controller.
//!
//! A [`Service`] owns one set of [`ServiceOptions`] and drives it through
//! `init -> start -> run -> stop`:
//!
//! - `try_init` applies options on every call and, on the first successful
//!   call only, parses flags, loads plugins and applies the flags.
//! - `start` runs the before-start hooks, starts the server and runs the
//!   after-start hooks, stopping at the first error.
//! - `stop` runs every before-stop hook, stops the server and runs every
//!   after-stop hook, returning the last error.
//! - `run` starts, waits for a signal or the context token, and stops once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use plexus_core::client::Client;
use plexus_core::profile::Profile;
use plexus_core::server::{Server, ServerOption};
use plexus_core::stats::Stats;
use plexus_core::store::StoreOption;
use plexus_core::trace::Tracer;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cmd::Flags;
use crate::debug::{self, DebugState};
use crate::defaults::Defaults;
use crate::error::ServiceError;
use crate::hooks::{run_best_effort, run_fail_fast};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::options::{self, ServiceOption, ServiceOptions};
use crate::plugin::SubsystemKind;
use crate::wrapper::{decorate_client, AuthSlot, NameSlot, StatsLayer, TraceHandlerLayer};

pub struct Service {
    opts: RwLock<ServiceOptions>,
    /// Set once the one-time part of `try_init` has succeeded.
    initialized: Mutex<bool>,
    defaults: Arc<Defaults>,
    name: NameSlot,
    auth: AuthSlot,
    tracer: Arc<dyn Tracer>,
    stats: Arc<dyn Stats>,
    lifecycle: Lifecycle,
}

impl Service {
    /// Builds a service on the process-wide defaults.
    #[must_use]
    pub fn new(opts: Vec<ServiceOption>) -> Self {
        Self::with_defaults(Defaults::shared(), opts)
    }

    /// Builds a service on `defaults`, applies `opts`, then installs the
    /// fixed client decorators and server wrappers.
    #[must_use]
    pub fn with_defaults(defaults: Arc<Defaults>, opts: Vec<ServiceOption>) -> Self {
        let mut options = ServiceOptions::build(&defaults, opts);
        let server_opts = options.server.options();

        let tracer = server_opts.tracer.clone().unwrap_or_else(|| defaults.tracer());
        let stats = defaults.stats();
        let name: NameSlot = Arc::new(ArcSwap::from_pointee(server_opts.name.clone()));
        let auth: AuthSlot = Arc::new(ArcSwap::from_pointee(Arc::clone(&options.auth)));

        options.client = decorate_client(
            Arc::clone(&options.client),
            Arc::clone(&auth),
            Arc::clone(&name),
            Arc::clone(&tracer),
        );

        let mut server_init = vec![ServerOption::WrapHandler(vec![
            Arc::new(StatsLayer::new(Arc::clone(&stats))),
            Arc::new(TraceHandlerLayer::new(Arc::clone(&tracer))),
        ])];
        if server_opts.tracer.is_none() {
            server_init.push(ServerOption::Tracer(Arc::clone(&tracer)));
        }
        if let Err(e) = options.server.init(server_init) {
            warn!(server = options.server.kind(), error = %e, "server rejected wrappers");
        }

        Self {
            opts: RwLock::new(options),
            initialized: Mutex::new(false),
            defaults,
            name,
            auth,
            tracer,
            stats,
            lifecycle: Lifecycle::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Initialisation
    // -----------------------------------------------------------------------

    /// Applies `opts`. The first successful call also parses flags, loads
    /// plugins, runs the command action, applies the flags and scopes the
    /// store to the service.
    ///
    /// # Errors
    ///
    /// Returns the first fatal configuration error. The one-time part is
    /// retried on the next call if it failed.
    pub fn try_init(&self, opts: Vec<ServiceOption>) -> Result<(), ServiceError> {
        self.opts.write().apply(opts);

        let mut initialized = self.initialized.lock();
        if !*initialized {
            self.init_once()?;
            *initialized = true;
            self.lifecycle.set(LifecycleState::Initialized);
        }
        drop(initialized);

        self.refresh_slots();
        Ok(())
    }

    /// Like [`Service::try_init`], but exits the process on error. Help and
    /// version requests print and exit through clap.
    pub fn init(&self, opts: Vec<ServiceOption>) {
        match self.try_init(opts) {
            Ok(()) => {}
            Err(ServiceError::Flags(e)) => e.exit(),
            Err(e) => {
                error!(error = %e, "service initialisation failed");
                std::process::exit(1);
            }
        }
    }

    fn init_once(&self) -> Result<(), ServiceError> {
        let (cmd, loader) = {
            let o = self.opts.read();
            (o.cmd.clone(), Arc::clone(&o.plugins))
        };
        let flags = cmd.parse()?;

        for name in &flags.plugin {
            let plugin = loader.load(name).map_err(|source| ServiceError::PluginLoad {
                name: name.clone(),
                source,
            })?;
            plugin
                .init(self.defaults.catalog())
                .map_err(|source| ServiceError::PluginInit {
                    name: name.clone(),
                    source,
                })?;
            info!(plugin = %name, "plugin loaded");
        }

        if let Some(action) = &cmd.action {
            action(&flags).map_err(ServiceError::Action)?;
        }

        let mutators = self.flag_options(&flags)?;

        let mut o = self.opts.write();
        if o.cmd.app_name.is_none() {
            o.cmd.app_name = Some(o.server.options().name);
        }
        o.apply(mutators);

        let table = flags
            .store_table
            .clone()
            .or_else(|| o.cmd.app_name.clone())
            .unwrap_or_default();
        o.store
            .init(vec![StoreOption::Table(table)])
            .map_err(|source| ServiceError::Collaborator {
                kind: "store",
                source,
            })?;
        Ok(())
    }

    /// Translates parsed flags into mutators, selecting named
    /// implementations from the catalog.
    fn flag_options(&self, flags: &Flags) -> Result<Vec<ServiceOption>, ServiceError> {
        let catalog = self.defaults.catalog();
        let unknown = |kind: SubsystemKind, name: &str| ServiceError::UnknownImplementation {
            kind,
            name: name.to_string(),
        };
        let mut out = Vec::new();

        if let Some(name) = &flags.broker {
            let b = catalog
                .broker(name)
                .ok_or_else(|| unknown(SubsystemKind::Broker, name))?;
            out.push(options::broker(b));
        }
        if let Some(name) = &flags.registry {
            let r = catalog
                .registry(name)
                .ok_or_else(|| unknown(SubsystemKind::Registry, name))?;
            out.push(options::registry(r));
        }
        if let Some(name) = &flags.transport {
            let t = catalog
                .transport(name)
                .ok_or_else(|| unknown(SubsystemKind::Transport, name))?;
            out.push(options::transport(t));
        }
        if let Some(name) = &flags.store {
            let s = catalog
                .store(name)
                .ok_or_else(|| unknown(SubsystemKind::Store, name))?;
            out.push(options::store(s));
        }
        if let Some(db) = flags.store_database.clone() {
            out.push(ServiceOption::new(move |o| {
                if let Err(e) = o.store.init(vec![StoreOption::Database(db)]) {
                    warn!(store = o.store.kind(), error = %e, "store rejected database");
                }
            }));
        }

        let mut server = Vec::new();
        if let Some(name) = &flags.server_name {
            server.push(ServerOption::Name(name.clone()));
        }
        if let Some(version) = &flags.server_version {
            server.push(ServerOption::Version(version.clone()));
        }
        if let Some(id) = &flags.server_id {
            server.push(ServerOption::Id(id.clone()));
        }
        if let Some(addr) = &flags.server_address {
            server.push(ServerOption::Address(addr.clone()));
        }
        if let Some(addr) = &flags.server_advertise {
            server.push(ServerOption::Advertise(addr.clone()));
        }
        if let Some(secs) = flags.register_ttl {
            server.push(ServerOption::RegisterTtl(Duration::from_secs(secs)));
        }
        if let Some(secs) = flags.register_interval {
            server.push(ServerOption::RegisterInterval(Duration::from_secs(secs)));
        }
        if !server.is_empty() {
            out.push(options::server_options(server));
        }
        if !flags.server_metadata.is_empty() {
            let extra = flags.metadata();
            out.push(ServiceOption::new(move |o| {
                let mut md = o.server.options().metadata;
                md.extend(extra);
                if let Err(e) = o.server.init(vec![ServerOption::Metadata(md)]) {
                    warn!(server = o.server.kind(), error = %e, "server rejected metadata");
                }
            }));
        }

        if let Some(timeout) = flags.client_request_timeout {
            out.push(options::request_timeout(timeout));
        }
        if let Some(addr) = flags.debug_address {
            out.push(options::debug_address(addr));
        }
        Ok(out)
    }

    /// Points the fixed client decorators at the current name and auth.
    fn refresh_slots(&self) {
        let o = self.opts.read();
        self.name.store(Arc::new(o.server.options().name));
        self.auth.store(Arc::new(Arc::clone(&o.auth)));
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Snapshot of the current options.
    #[must_use]
    pub fn options(&self) -> ServiceOptions {
        self.opts.read().clone()
    }

    /// The decorated client: auth, from-service and trace headers applied.
    #[must_use]
    pub fn client(&self) -> Arc<dyn Client> {
        Arc::clone(&self.opts.read().client)
    }

    /// The server, with the stats and trace wrappers installed.
    #[must_use]
    pub fn server(&self) -> Arc<dyn Server> {
        Arc::clone(&self.opts.read().server)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Receiver notified on every lifecycle transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns the first failing before-start hook (the server is not
    /// started), the server's start error, or the first failing after-start
    /// hook (the server is left running).
    pub async fn start(&self) -> anyhow::Result<()> {
        let (before, after, server) = {
            let o = self.opts.read();
            (o.before_start.clone(), o.after_start.clone(), Arc::clone(&o.server))
        };

        run_fail_fast(&before).await?;
        server.start().await?;
        run_fail_fast(&after).await?;

        self.lifecycle.set(LifecycleState::Running);
        info!(service = %self.name.load_full(), server = server.kind(), "service started");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the server's stop error immediately, before the after-stop
    /// hooks run. Otherwise returns the last hook error, if any.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let (before, after, server) = {
            let o = self.opts.read();
            (o.before_stop.clone(), o.after_stop.clone(), Arc::clone(&o.server))
        };

        let mut last = run_best_effort(&before).await;

        if let Err(e) = server.stop().await {
            self.lifecycle.set(LifecycleState::Stopped);
            return Err(e);
        }

        if let Some(e) = run_best_effort(&after).await {
            last = Some(e);
        }

        self.lifecycle.set(LifecycleState::Stopped);
        info!(service = %self.name.load_full(), "service stopped");
        last.map_or(Ok(()), Err)
    }

    /// Starts the service and blocks until a shutdown signal arrives or the
    /// context token is cancelled, then stops it exactly once.
    ///
    /// # Errors
    ///
    /// Returns errors from the profiler, `start`, the debug listener, or
    /// `stop`.
    pub async fn run(&self) -> anyhow::Result<()> {
        let (server, profile, token, signal, debug_address, metrics) = {
            let o = self.opts.read();
            (
                Arc::clone(&o.server),
                Arc::clone(&o.profile),
                o.context.clone(),
                o.signal,
                o.debug_address,
                o.metrics.clone(),
            )
        };

        let debug_state = DebugState {
            stats: Arc::clone(&self.stats),
            tracer: Arc::clone(&self.tracer),
            lifecycle: self.lifecycle.state_handle(),
            metrics,
        };
        // A server shared with an earlier run already routes `Debug`.
        if let Err(e) = server.handle(debug::handler(&debug_state)) {
            debug!(server = server.kind(), error = %e, "debug handler not registered");
        }

        profile.start()?;
        let _profile = ProfileGuard(profile);

        self.start().await?;

        let listener_stop = token.child_token();
        let listener = match debug_address {
            Some(addr) => match debug::http::serve(addr, debug_state, listener_stop.clone()).await {
                Ok((_, handle)) => Some(handle),
                Err(e) => {
                    if let Err(stop_err) = self.stop().await {
                        warn!(error = %stop_err, "stop after debug listener failure failed");
                    }
                    return Err(e);
                }
            },
            None => None,
        };

        wait_for_shutdown(&token, signal).await;
        info!(service = %self.name.load_full(), "shutting down");

        let result = self.stop().await;

        listener_stop.cancel();
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                warn!(error = %e, "debug listener task failed");
            }
        }
        result
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("plexus")
    }
}

/// Stops the profiler on every exit path of `run`.
struct ProfileGuard(Arc<dyn Profile>);

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.stop() {
            warn!(profile = self.0.kind(), error = %e, "profiler stop failed");
        }
    }
}

async fn wait_for_shutdown(token: &CancellationToken, signal: bool) {
    if !signal {
        token.cancelled().await;
        return;
    }
    tokio::select! {
        () = token.cancelled() => {}
        () = os_signal() => info!("received shutdown signal"),
    }
}

/// Resolves on SIGTERM, SIGINT or SIGQUIT. Never resolves if the handlers
/// cannot be installed.
#[cfg(unix)]
async fn os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut term), Ok(mut int), Ok(mut quit)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
    ) else {
        warn!("failed to install signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
        _ = quit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn os_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
