//! Headless walkthrough of the isolation core: registers the demo module,
//! drives an isolated factory and an in-process factory through a full
//! lifecycle, and finishes with a transient run.

use std::sync::Arc;

use anyhow::Result;
use cloister_addon_api::Addon;
use cloister_demo_worker::{DemoEcho, DemoWorker, EXPORTS, MODULE_NAME};
use cloister_host::{AddonFactory, AddonHost, FactoryConfig, NativeModule};
use tracing_subscriber::EnvFilter;

/// The demo addon types, registered as a host-native module.
struct DemoLibModule;

impl NativeModule for DemoLibModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn type_names(&self) -> Vec<String> {
        EXPORTS.iter().map(|e| e.type_name.to_string()).collect()
    }

    fn create(&self, type_name: &str) -> Result<Box<dyn Addon>> {
        match type_name {
            "Demo.Worker" => Ok(Box::new(DemoWorker::default())),
            "Demo.Echo" => Ok(Box::new(DemoEcho)),
            other => Err(anyhow::anyhow!("type `{other}` is not exported")),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = AddonHost::new()?;
    host.register_native_module(Arc::new(DemoLibModule));

    // Isolated path: the addon lives in its own reclaimable domain.
    let factory = host.isolated_factory(
        FactoryConfig::new("Demo.Worker, demo", MODULE_NAME).with_probe_paths("/opt/libs"),
    )?;
    let proxy = factory.load()?;
    tracing::info!(domain = ?proxy.domain_name(), "isolated addon up");

    proxy.start()?;
    let reply = proxy.call("hello", "\"cloister\"")?;
    tracing::info!(%reply, "call crossed the domain boundary");
    proxy.stop()?;
    let stats = proxy.stats()?;
    tracing::info!(
        starts = stats.start_count,
        stops = stats.stop_count,
        last_run_ms = stats.last_run.as_millis() as u64,
        "lifecycle bookkeeping"
    );
    factory.unload()?;

    // Trusted path: same factory shape, no isolation.
    let local = host.in_process_factory(MODULE_NAME, "Demo.Echo")?;
    let echo = local.load()?;
    tracing::info!(reply = %echo.call("echo", "[1,2,3]")?, "in-process echo");
    local.unload()?;

    // Transient path: run once, reclaim everything.
    let sum = host.execute("", vec![1u64, 2, 3], |values| {
        Ok(values.into_iter().sum::<u64>())
    })?;
    tracing::info!(sum, "transient run complete");

    Ok(())
}
