//! `portico demo`: a host and an embedded context talking over the
//! in-memory bus.
//!
//! The host exposes `multiply`, the embedded context exposes `greet` and
//! `port`. Both sides connect, call each other, and the host tears the
//! connection down.

use crate::ui;
use anyhow::Context;
use portico_wire::{
    connect_to_embedded, connect_to_host, load_config, DocumentLocation, EmbeddedOptions,
    HostOptions, MemoryBus, MemoryFrame, Methods,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const HOST_LOCATION: &str = "https://host.example/index.html";
const CHILD_SRC: &str = "https://child.example/widget.html";
const DEFAULT_DEMO_TIMEOUT_MS: u64 = 5_000;

pub fn cmd_demo(
    config: Option<PathBuf>,
    timeout_ms: Option<u64>,
    debug: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(config.as_deref());
    if let Some(ms) = timeout_ms {
        config.connect_timeout = Some(Duration::from_millis(ms));
    }
    if config.connect_timeout.is_none() {
        config.connect_timeout = Some(Duration::from_millis(DEFAULT_DEMO_TIMEOUT_MS));
    }
    config.debug_logging |= debug;

    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let report = rt.block_on(run_demo(&config))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing report")?
        );
        return Ok(());
    }

    ui::section("Portico demo");
    ui::kv("Host", &report.host_origin);
    ui::kv("Embedded", &report.child_origin);
    ui::kv("Host sees", &report.child_methods.join(", "));
    ui::kv("Child sees", &report.host_methods.join(", "));
    ui::blank();
    ui::kv_ok("greet", &report.greeting);
    ui::kv_ok("multiply", &report.product.to_string());
    ui::kv_warn("port", &report.failure);
    ui::blank();
    ui::success("Connection destroyed cleanly");
    Ok(())
}

#[derive(Debug, serde::Serialize)]
struct DemoReport {
    host_origin: String,
    child_origin: String,
    child_methods: Vec<String>,
    host_methods: Vec<String>,
    greeting: String,
    product: i64,
    failure: String,
}

async fn run_demo(config: &portico_wire::ConnectConfig) -> anyhow::Result<DemoReport> {
    let bus = MemoryBus::from_config(config);
    let location =
        DocumentLocation::parse(HOST_LOCATION).context("parsing demo host location")?;
    let host = bus.open_top_level(location);
    let frame = Arc::new(MemoryFrame::new(&host));
    let child = frame.load(CHILD_SRC)?;

    let host_methods =
        Methods::new().method("multiply", |(a, b): (i64, i64)| async move { Ok(a * b) });
    let child_methods = Methods::new()
        .method("greet", |(name,): (String,)| async move {
            Ok(format!("Hello, {name}!"))
        })
        .fallible("port", |(raw,): (String,)| async move { raw.parse::<u16>() });

    let host_conn = connect_to_embedded(
        Arc::new(host.clone()),
        frame.clone(),
        EmbeddedOptions::from_config(config, host_methods),
    )?;
    let child_conn = connect_to_host(
        Arc::new(child.clone()),
        HostOptions {
            methods: child_methods,
            connect_timeout: config.connect_timeout,
            debug_logging: config.debug_logging,
            ..Default::default()
        },
    )?;

    let child_api = host_conn.established().await?;
    let host_api = child_conn.established().await?;

    let greeting: String = child_api.invoke("greet", ("Portico",)).await?;
    let product: i64 = host_api.invoke("multiply", (6, 7)).await?;
    let failure = match child_api.call("port", vec![json!("eighty")]).await {
        Ok(value) => format!("unexpectedly resolved with {value}"),
        Err(e) => e.to_string(),
    };

    let report = DemoReport {
        host_origin: host.origin().unwrap_or_default(),
        child_origin: child.origin().unwrap_or_default(),
        child_methods: child_api.method_names(),
        host_methods: host_api.method_names(),
        greeting,
        product,
        failure,
    };

    host_conn.destroy();
    child_conn.destroy();
    tracing::info!(contexts = bus.context_count(), "Portico: demo finished");
    Ok(report)
}
