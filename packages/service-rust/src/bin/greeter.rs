//! Example service: answers `Greeter.Hello` and announces each greeting on a
//! topic it also subscribes to.
//!
//! ```text
//! RUST_LOG=debug plexus-greeter --server-name greeter --debug-address 127.0.0.1:9090
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use plexus_core::context::RequestContext;
use plexus_core::error::CallError;
use plexus_core::server::{subscriber_fn, Handler};
use plexus_service::event::{register_handler, register_subscriber};
use plexus_service::options::{name, prometheus, version};
use plexus_service::{Event, Service};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const GREETED_TOPIC: &str = "greeter.greeted";

#[derive(Debug, Deserialize)]
struct HelloRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct HelloResponse {
    greeting: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut opts = vec![name("greeter"), version("0.1.0")];
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => opts.push(prometheus(handle)),
        Err(e) => warn!(error = %e, "prometheus recorder not installed"),
    }

    let service = Service::new(opts);
    service.init(vec![]);

    let greeted = Event::new(GREETED_TOPIC, service.client());
    let handler = Handler::new("Greeter").typed("Hello", move |ctx: RequestContext, req: HelloRequest| {
        let greeted = greeted.clone();
        async move {
            let greeting = format!("Hello, {}!", req.name);
            greeted.publish(ctx, &req.name).await?;
            Ok::<_, CallError>(HelloResponse { greeting })
        }
    });

    let server = service.server();
    register_handler(server.as_ref(), handler)?;
    let on_greeted = subscriber_fn(|_ctx, payload: Value| async move {
        info!(name = %payload, "greeted");
        Ok::<_, CallError>(())
    });
    register_subscriber(
        server.as_ref(),
        server.new_subscriber(GREETED_TOPIC, on_greeted, vec![]),
    )?;

    service.run().await
}
