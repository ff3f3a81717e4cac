//! Service options and the mutators that build them.
//!
//! [`ServiceOptions::build`] starts from the shared default collaborators and
//! applies each [`ServiceOption`] in the order given. Later mutators win.
//! Swapping the broker, registry or transport is pushed into the client and
//! server already held by the options (and, for the registry, into the
//! broker), so options can be given in any order.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use plexus_core::auth::Auth;
use plexus_core::broker::{Broker, BrokerOption};
use plexus_core::client::{CallWrapper, Client, ClientOption};
use plexus_core::config::Config;
use plexus_core::profile::Profile;
use plexus_core::registry::Registry;
use plexus_core::runtime::Runtime;
use plexus_core::server::{HandlerWrapper, RegisterCheck, Server, ServerOption, SubscriberWrapper};
use plexus_core::store::Store;
use plexus_core::trace::Tracer;
use plexus_core::transport::Transport;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cmd::{Cmd, Flags};
use crate::defaults::Defaults;
use crate::hooks::Hook;
use crate::plugin::{PluginCatalog, PluginLoader};
use crate::wrapper::{wrap_client as apply_client_wrappers, ClientWrapper};

// ---------------------------------------------------------------------------
// ServiceOptions
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ServiceOptions {
    pub auth: Arc<dyn Auth>,
    pub broker: Arc<dyn Broker>,
    pub client: Arc<dyn Client>,
    pub config: Arc<dyn Config>,
    pub server: Arc<dyn Server>,
    pub store: Arc<dyn Store>,
    pub registry: Arc<dyn Registry>,
    pub runtime: Arc<dyn Runtime>,
    pub transport: Arc<dyn Transport>,
    pub profile: Arc<dyn Profile>,

    pub before_start: Vec<Hook>,
    pub before_stop: Vec<Hook>,
    pub after_start: Vec<Hook>,
    pub after_stop: Vec<Hook>,

    /// Cancelling this token makes `run` stop the service.
    pub context: CancellationToken,
    /// Whether `run` also stops on SIGTERM, SIGINT and SIGQUIT.
    pub signal: bool,

    pub cmd: Cmd,
    pub plugins: Arc<dyn PluginLoader>,
    /// HTTP introspection listener, off unless set.
    pub debug_address: Option<SocketAddr>,
    /// Rendered on the debug listener's `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

impl ServiceOptions {
    /// Default collaborators from `defaults`, then `opts` in order.
    #[must_use]
    pub fn build(defaults: &Defaults, opts: Vec<ServiceOption>) -> Self {
        let mut options = Self {
            auth: defaults.auth(),
            broker: defaults.broker(),
            client: defaults.client(),
            config: defaults.settings(),
            server: defaults.server(),
            store: defaults.store(),
            registry: defaults.registry(),
            runtime: defaults.runtime(),
            transport: defaults.transport(),
            profile: defaults.profile(),
            before_start: Vec::new(),
            before_stop: Vec::new(),
            after_start: Vec::new(),
            after_stop: Vec::new(),
            context: CancellationToken::new(),
            signal: true,
            cmd: Cmd::default(),
            plugins: Arc::new(PluginCatalog::new()),
            debug_address: None,
            metrics: None,
        };
        options.apply(opts);
        options
    }

    pub fn apply(&mut self, opts: Vec<ServiceOption>) {
        for opt in opts {
            (opt.0)(self);
        }
    }

    fn init_client(&self, opts: Vec<ClientOption>) {
        if let Err(e) = self.client.init(opts) {
            warn!(client = self.client.kind(), error = %e, "client rejected option");
        }
    }

    fn init_server(&self, opts: Vec<ServerOption>) {
        if let Err(e) = self.server.init(opts) {
            warn!(server = self.server.kind(), error = %e, "server rejected option");
        }
    }
}

impl fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("auth", &self.auth.kind())
            .field("broker", &self.broker.kind())
            .field("client", &self.client.kind())
            .field("server", &self.server.kind())
            .field("store", &self.store.kind())
            .field("registry", &self.registry.kind())
            .field("runtime", &self.runtime.kind())
            .field("transport", &self.transport.kind())
            .field("profile", &self.profile.kind())
            .field("before_start", &self.before_start.len())
            .field("before_stop", &self.before_stop.len())
            .field("after_start", &self.after_start.len())
            .field("after_stop", &self.after_stop.len())
            .field("signal", &self.signal)
            .field("cmd", &self.cmd)
            .field("debug_address", &self.debug_address)
            .finish_non_exhaustive()
    }
}

/// One ordered change to [`ServiceOptions`].
pub struct ServiceOption(Box<dyn FnOnce(&mut ServiceOptions) + Send>);

impl ServiceOption {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut ServiceOptions) + Send + 'static,
    {
        Self(Box::new(f))
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Sets the broker and hands it to the client and server.
#[must_use]
pub fn broker(b: Arc<dyn Broker>) -> ServiceOption {
    ServiceOption::new(move |o| {
        o.init_client(vec![ClientOption::Broker(Arc::clone(&b))]);
        o.init_server(vec![ServerOption::Broker(Arc::clone(&b))]);
        o.broker = b;
    })
}

/// Sets the registry and hands it to the client, server and broker.
#[must_use]
pub fn registry(r: Arc<dyn Registry>) -> ServiceOption {
    ServiceOption::new(move |o| {
        o.init_client(vec![ClientOption::Registry(Arc::clone(&r))]);
        o.init_server(vec![ServerOption::Registry(Arc::clone(&r))]);
        if let Err(e) = o.broker.init(vec![BrokerOption::Registry(Arc::clone(&r))]) {
            warn!(broker = o.broker.kind(), error = %e, "broker rejected registry");
        }
        o.registry = r;
    })
}

/// Sets the transport and hands it to the client and server.
#[must_use]
pub fn transport(t: Arc<dyn Transport>) -> ServiceOption {
    ServiceOption::new(move |o| {
        o.init_client(vec![ClientOption::Transport(Arc::clone(&t))]);
        o.init_server(vec![ServerOption::Transport(Arc::clone(&t))]);
        o.transport = t;
    })
}

/// Replaces the client. It keeps its own broker, registry and transport.
#[must_use]
pub fn client(c: Arc<dyn Client>) -> ServiceOption {
    ServiceOption::new(move |o| o.client = c)
}

/// Replaces the server.
#[must_use]
pub fn server(s: Arc<dyn Server>) -> ServiceOption {
    ServiceOption::new(move |o| o.server = s)
}

/// Replaces the store.
#[must_use]
pub fn store(s: Arc<dyn Store>) -> ServiceOption {
    ServiceOption::new(move |o| o.store = s)
}

/// Replaces the auth provider used by the client auth decorator.
#[must_use]
pub fn auth(a: Arc<dyn Auth>) -> ServiceOption {
    ServiceOption::new(move |o| o.auth = a)
}

/// Replaces the config source.
#[must_use]
pub fn config(c: Arc<dyn Config>) -> ServiceOption {
    ServiceOption::new(move |o| o.config = c)
}

/// Replaces the runtime.
#[must_use]
pub fn runtime(r: Arc<dyn Runtime>) -> ServiceOption {
    ServiceOption::new(move |o| o.runtime = r)
}

/// Profiler started and stopped around `run`.
#[must_use]
pub fn profile(p: Arc<dyn Profile>) -> ServiceOption {
    ServiceOption::new(move |o| o.profile = p)
}

/// Tracer used by the server for inbound spans.
#[must_use]
pub fn tracer(t: Arc<dyn Tracer>) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::Tracer(t)]))
}

/// Token whose cancellation makes `run` stop the service.
#[must_use]
pub fn context(token: CancellationToken) -> ServiceOption {
    ServiceOption::new(move |o| o.context = token)
}

/// Whether `run` also stops on SIGTERM, SIGINT or SIGQUIT. Defaults to `true`.
#[must_use]
pub fn handle_signal(enabled: bool) -> ServiceOption {
    ServiceOption::new(move |o| o.signal = enabled)
}

// ---------------------------------------------------------------------------
// Server shortcuts
// ---------------------------------------------------------------------------

#[must_use]
pub fn name(name: impl Into<String>) -> ServiceOption {
    let name = name.into();
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::Name(name)]))
}

#[must_use]
pub fn version(version: impl Into<String>) -> ServiceOption {
    let version = version.into();
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::Version(version)]))
}

#[must_use]
pub fn address(addr: impl Into<String>) -> ServiceOption {
    let addr = addr.into();
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::Address(addr)]))
}

#[must_use]
pub fn metadata(md: BTreeMap<String, String>) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::Metadata(md)]))
}

#[must_use]
pub fn register_ttl(ttl: Duration) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::RegisterTtl(ttl)]))
}

#[must_use]
pub fn register_interval(interval: Duration) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::RegisterInterval(interval)]))
}

/// Passes raw server options through, in order.
#[must_use]
pub fn server_options(opts: Vec<ServerOption>) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(opts))
}

/// Gate run before every registration and re-registration.
#[must_use]
pub fn register_check(check: RegisterCheck) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::RegisterCheck(check)]))
}

// ---------------------------------------------------------------------------
// Client shortcuts
// ---------------------------------------------------------------------------

#[must_use]
pub fn request_timeout(timeout: Duration) -> ServiceOption {
    ServiceOption::new(move |o| o.init_client(vec![ClientOption::RequestTimeout(timeout)]))
}

// ---------------------------------------------------------------------------
// Wrappers
// ---------------------------------------------------------------------------

/// Wraps the whole client. The first wrapper is outermost.
#[must_use]
pub fn wrap_client(wrappers: Vec<Arc<dyn ClientWrapper>>) -> ServiceOption {
    ServiceOption::new(move |o| {
        o.client = apply_client_wrappers(Arc::clone(&o.client), &wrappers);
    })
}

/// Wraps the client's call path. The first wrapper is outermost.
#[must_use]
pub fn wrap_call(wrappers: Vec<Arc<dyn CallWrapper>>) -> ServiceOption {
    ServiceOption::new(move |o| o.init_client(vec![ClientOption::WrapCall(wrappers)]))
}

/// Wraps every handler endpoint. The first wrapper is outermost.
#[must_use]
pub fn wrap_handler(wrappers: Vec<Arc<dyn HandlerWrapper>>) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::WrapHandler(wrappers)]))
}

/// Wraps every subscriber. The first wrapper is outermost.
#[must_use]
pub fn wrap_subscriber(wrappers: Vec<Arc<dyn SubscriberWrapper>>) -> ServiceOption {
    ServiceOption::new(move |o| o.init_server(vec![ServerOption::WrapSubscriber(wrappers)]))
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

#[must_use]
pub fn before_start(hook: Hook) -> ServiceOption {
    ServiceOption::new(move |o| o.before_start.push(hook))
}

#[must_use]
pub fn before_stop(hook: Hook) -> ServiceOption {
    ServiceOption::new(move |o| o.before_stop.push(hook))
}

#[must_use]
pub fn after_start(hook: Hook) -> ServiceOption {
    ServiceOption::new(move |o| o.after_start.push(hook))
}

#[must_use]
pub fn after_stop(hook: Hook) -> ServiceOption {
    ServiceOption::new(move |o| o.after_stop.push(hook))
}

// ---------------------------------------------------------------------------
// Command line, plugins, introspection
// ---------------------------------------------------------------------------

/// Arguments to parse instead of the process arguments. The first entry is
/// the program name.
#[must_use]
pub fn args<I, S>(args: I) -> ServiceOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let args: Vec<String> = args.into_iter().map(Into::into).collect();
    ServiceOption::new(move |o| o.cmd.args = Some(args))
}

/// Callback run with the parsed flags on first initialisation.
#[must_use]
pub fn action<F>(f: F) -> ServiceOption
where
    F: Fn(&Flags) -> anyhow::Result<()> + Send + Sync + 'static,
{
    ServiceOption::new(move |o| o.cmd.action = Some(Arc::new(f)))
}

#[must_use]
pub fn plugins(loader: Arc<dyn PluginLoader>) -> ServiceOption {
    ServiceOption::new(move |o| o.plugins = loader)
}

#[must_use]
pub fn debug_address(addr: SocketAddr) -> ServiceOption {
    ServiceOption::new(move |o| o.debug_address = Some(addr))
}

#[must_use]
pub fn prometheus(handle: PrometheusHandle) -> ServiceOption {
    ServiceOption::new(move |o| o.metrics = Some(handle))
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use plexus_core::broker::MemoryBroker;
    use plexus_core::registry::MemoryRegistry;
    use plexus_core::transport::MemoryTransport;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn build_without_options_uses_defaults() {
        let defaults = Defaults::new();
        let opts = ServiceOptions::build(&defaults, vec![]);
        assert!(Arc::ptr_eq(&opts.server, &defaults.server()));
        assert!(Arc::ptr_eq(&opts.registry, &defaults.registry()));
        assert_eq!(opts.profile.kind(), "noop");
        assert!(opts.signal);
        assert!(opts.before_start.is_empty());
        assert!(!opts.context.is_cancelled());
    }

    #[test]
    fn registry_propagates_to_client_server_and_broker() {
        let defaults = Defaults::new();
        let registry: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let opts = ServiceOptions::build(&defaults, vec![self::registry(Arc::clone(&registry))]);

        assert!(Arc::ptr_eq(&opts.registry, &registry));
        assert!(Arc::ptr_eq(&opts.client.options().registry, &registry));
        assert!(Arc::ptr_eq(&opts.server.options().registry, &registry));
        let broker_registry = opts.broker.options().registry.unwrap();
        assert!(Arc::ptr_eq(&broker_registry, &registry));
    }

    #[test]
    fn registry_reaches_broker_set_earlier() {
        let defaults = Defaults::new();
        let b: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let r: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
        let opts = ServiceOptions::build(
            &defaults,
            vec![broker(Arc::clone(&b)), self::registry(Arc::clone(&r))],
        );

        assert!(Arc::ptr_eq(&opts.server.options().broker, &b));
        assert!(Arc::ptr_eq(&b.options().registry.unwrap(), &r));
        // The default broker was replaced before the registry changed.
        assert!(defaults.broker().options().registry.is_some_and(|dr| !Arc::ptr_eq(&dr, &r)));
    }

    #[test]
    fn transport_propagates_to_client_and_server() {
        let defaults = Defaults::new();
        let t: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let opts = ServiceOptions::build(&defaults, vec![transport(Arc::clone(&t))]);
        assert!(Arc::ptr_eq(&opts.client.options().transport, &t));
        assert!(Arc::ptr_eq(&opts.server.options().transport, &t));
    }

    #[test]
    fn hooks_accumulate_in_order() {
        let defaults = Defaults::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = |tag: &'static str| {
            let log = Arc::clone(&log);
            Hook::from_fn(move || {
                log.lock().push(tag);
                Ok(())
            })
        };
        let opts = ServiceOptions::build(
            &defaults,
            vec![before_start(hook("a")), before_start(hook("b")), after_stop(hook("z"))],
        );
        assert_eq!(opts.before_start.len(), 2);
        assert_eq!(opts.after_stop.len(), 1);
        assert!(opts.before_stop.is_empty());
    }

    #[test]
    fn apply_after_build_still_mutates() {
        let defaults = Defaults::new();
        let mut opts = ServiceOptions::build(&defaults, vec![handle_signal(false)]);
        opts.apply(vec![handle_signal(true), args(["svc", "--server-name", "x"])]);
        assert!(opts.signal);
        assert_eq!(opts.cmd.args.as_ref().map(Vec::len), Some(3));
    }

    proptest! {
        #[test]
        fn last_write_wins(
            names in proptest::collection::vec("[a-z]{1,8}", 1..8),
            ttls in proptest::collection::vec(1u64..600, 1..8),
        ) {
            let defaults = Defaults::new();
            let mut mutators = Vec::new();
            // Interleave the two fields so each write has unrelated writes around it.
            for i in 0..names.len().max(ttls.len()) {
                if let Some(n) = names.get(i) {
                    mutators.push(name(n.clone()));
                }
                if let Some(t) = ttls.get(i) {
                    mutators.push(register_ttl(Duration::from_secs(*t)));
                }
            }
            let opts = ServiceOptions::build(&defaults, mutators);
            let server = opts.server.options();
            prop_assert_eq!(&server.name, names.last().unwrap());
            prop_assert_eq!(server.register_ttl, Duration::from_secs(*ttls.last().unwrap()));
        }

        #[test]
        fn last_signal_setting_wins(flags in proptest::collection::vec(any::<bool>(), 1..10)) {
            let defaults = Defaults::new();
            let mutators = flags.iter().map(|f| handle_signal(*f)).collect();
            let opts = ServiceOptions::build(&defaults, mutators);
            prop_assert_eq!(opts.signal, *flags.last().unwrap());
        }
    }
}
