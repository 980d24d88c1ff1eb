use std::sync::Arc;
use std::time::Duration;

use crate::config::{FactoryConfig, HostConfig};
use crate::error::Error;
use crate::factory::AddonFactory;
use crate::host::AddonHost;
use crate::resolve::ModuleLocation;
use crate::tests::support::ProbeModule;

fn demo_host() -> AddonHost {
    let host = AddonHost::new().expect("host");
    host.register_native_module(ProbeModule::new("demo.lib"));
    host
}

fn demo_config() -> FactoryConfig {
    FactoryConfig::new("Demo.Worker, demo", "demo.lib").with_probe_paths("/opt/libs")
}

#[test]
fn blank_configuration_is_rejected_at_construction() {
    let host = demo_host();
    let err = host
        .isolated_factory(FactoryConfig::new("", "demo.lib"))
        .err()
        .expect("blank type name must fail");
    assert!(matches!(err, Error::Configuration { field: "type_name", .. }));
}

#[test]
fn load_twice_returns_the_same_proxy_instance() {
    let host = demo_host();
    let factory = host.isolated_factory(demo_config()).expect("factory");
    assert!(!factory.is_loaded());

    let first = factory.load().expect("first load");
    assert!(factory.is_loaded());
    let second = factory.load().expect("second load");
    assert!(first.same_instance(&second));
    assert_eq!(first.instance_id(), second.instance_id());
}

#[test]
fn unload_then_load_produces_a_new_domain_and_proxy() {
    let host = demo_host();
    let factory = host.isolated_factory(demo_config()).expect("factory");

    let first = factory.load().expect("load");
    let first_domain = factory.domain_name().expect("domain while loaded");
    factory.unload().expect("unload");
    assert!(!factory.is_loaded());

    let second = factory.load().expect("reload");
    let second_domain = factory.domain_name().expect("domain after reload");
    assert!(!first.same_instance(&second));
    assert_ne!(first_domain, second_domain);

    // The fresh instance carries none of the old one's state.
    let reply = second.call("hello", "\"x\"").expect("call");
    let reply: serde_json::Value = serde_json::from_str(&reply).expect("json reply");
    assert_eq!(reply["calls"], 1);
}

#[test]
fn unload_when_not_loaded_is_a_no_op() {
    let host = demo_host();
    let factory = host.isolated_factory(demo_config()).expect("factory");
    factory.unload().expect("first unload");
    factory.unload().expect("second unload");
    assert!(!factory.is_loaded());
}

#[test]
fn calls_run_inside_the_domain_not_the_host() {
    let host = demo_host();
    let factory = host.isolated_factory(demo_config()).expect("factory");
    let proxy = factory.load().expect("load");
    assert!(factory.is_loaded());

    let reply = proxy.call("hello", "\"x\"").expect("call");
    let reply: serde_json::Value = serde_json::from_str(&reply).expect("json reply");
    assert_eq!(reply["echo"], "\"x\"");
    // The responding thread is the domain worker, not this test thread.
    let domain = factory.domain_name().expect("domain name");
    assert!(reply["thread"]
        .as_str()
        .expect("thread name")
        .contains(&domain));
}

#[test]
fn lifecycle_round_trip_through_proxy() {
    let host = demo_host();
    let factory = host.isolated_factory(demo_config()).expect("factory");
    let proxy = factory.load().expect("load");

    assert!(!proxy.is_running().expect("running?"));
    proxy.start().expect("start");
    assert!(proxy.is_running().expect("running?"));
    let stats = proxy.stats().expect("stats");
    assert_eq!(stats.start_count, 1);

    proxy.stop().expect("stop");
    let stats = proxy.stats().expect("stats");
    assert_eq!(stats.stop_count, 1);
    assert!(!stats.is_running);
}

#[test]
fn invocation_failures_preserve_the_addon_message() {
    let host = demo_host();
    let factory = host.isolated_factory(demo_config()).expect("factory");
    let proxy = factory.load().expect("load");

    let err = proxy.call("fail", "because").expect_err("must fail");
    assert!(matches!(err, Error::Invocation { .. }));
    assert!(err.to_string().contains("requested failure: because"));

    // A panicking addon surfaces as an error too, and the domain survives.
    let err = proxy.call("panic", "").expect_err("must fail");
    assert!(err.to_string().contains("probe addon asked to panic"));
    assert!(proxy.call("hello", "\"again\"").is_ok());
}

#[test]
fn instantiation_failure_leaves_domain_for_retry() {
    let host = demo_host();
    let factory = host
        .isolated_factory(FactoryConfig::new("Demo.Missing", "demo.lib"))
        .expect("factory");

    let err = factory.load().expect_err("unknown type");
    assert!(matches!(err, Error::Instantiation { .. }));
    assert!(err.to_string().contains("Demo.Missing"));
    assert!(!factory.is_loaded());
    let residual_domain = factory.domain_name().expect("domain kept for retry");

    // Retrying does not rebuild the domain.
    let err = factory.load().expect_err("still unknown");
    assert!(matches!(err, Error::Instantiation { .. }));
    assert_eq!(factory.domain_name().expect("same domain"), residual_domain);
}

#[test]
fn preload_failure_aborts_load_and_propagates() {
    let host = demo_host();
    let config = FactoryConfig::new("Demo.Worker", "demo.lib")
        .with_preload(["nowhere.lib"]);
    let factory = host.isolated_factory(config).expect("factory");

    let err = factory.load().expect_err("preload must fail");
    assert!(matches!(err, Error::ModuleNotFound { .. }));
    assert!(!factory.is_loaded());
}

#[test]
fn preloads_are_loaded_in_order_before_instantiation() {
    let host = demo_host();
    let extra = ProbeModule::new("extra.lib");
    host.register_native_module(extra.clone());

    let config = FactoryConfig::new("Demo.Worker", "demo.lib").with_preload(["extra.lib"]);
    let factory = host.isolated_factory(config).expect("factory");
    let proxy = factory.load().expect("load");
    assert!(proxy.call("hello", "\"x\"").is_ok());
}

#[test]
fn unload_reclaims_the_domain_and_invalidates_the_proxy() {
    let host = demo_host();
    let factory = host.isolated_factory(demo_config()).expect("factory");
    let proxy = factory.load().expect("load");
    assert_eq!(host.lease_count(), 1);

    factory.unload().expect("unload");
    assert_eq!(host.lease_count(), 0);
    let err = proxy.call("hello", "\"x\"").expect_err("proxy is dead");
    assert!(matches!(
        err,
        Error::ProxyInvalid { .. } | Error::DomainUnavailable { .. }
    ));
}

#[test]
fn factory_sponsor_keeps_lease_alive_until_unload() {
    let host = AddonHost::with_config(HostConfig {
        lease_window: Duration::from_millis(15),
        tick_interval: Duration::from_millis(5),
    })
    .expect("host");
    host.register_native_module(ProbeModule::new("demo.lib"));

    let factory = host.isolated_factory(demo_config()).expect("factory");
    let proxy = factory.load().expect("load");

    // Many renewal windows pass; the factory is loaded, so the sponsor
    // keeps renewing and the proxy stays usable.
    std::thread::sleep(Duration::from_millis(90));
    assert!(proxy.call("hello", "\"still here\"").is_ok());

    factory.unload().expect("unload");
    assert!(proxy.call("hello", "\"gone\"").is_err());
}

#[test]
fn in_process_factory_has_the_same_shape_without_isolation() {
    let host = demo_host();
    let factory = host
        .in_process_factory("demo.lib", "Demo.Echo, local")
        .expect("factory");
    assert!(!factory.is_loaded());

    let first = factory.load().expect("load");
    let second = factory.addon().expect("addon accessor");
    assert!(first.same_instance(&second));
    assert!(factory.is_loaded());
    assert!(first.instance_id().is_none());
    assert!(first.domain_name().is_none());

    first.start().expect("start");
    let reply = first.call("hello", "\"x\"").expect("call");
    // No domain worker involved; the call ran on the calling thread.
    assert!(!reply.contains("cloister-domain"));

    factory.unload().expect("unload");
    assert!(!factory.is_loaded());
}

#[test]
fn in_process_factory_requires_a_registered_native_module() {
    let host = demo_host();
    let factory = host
        .in_process_factory("ghost.lib", "Demo.Echo")
        .expect("factory");
    let err = factory.load().expect_err("module not registered");
    assert!(matches!(err, Error::ModuleNotFound { .. }));
}

#[test]
fn domain_destroy_is_idempotent_and_handles_released_proxies() {
    let host = demo_host();
    let domain = crate::domain::IsolationDomain::create(
        "manual-1".to_string(),
        crate::domain::DomainConfig {
            base_dir: std::path::PathBuf::from("."),
            probe_paths: String::new(),
        },
        Arc::new(host_registry_with_demo()),
    )
    .expect("domain");

    let id = domain
        .instantiate(ModuleLocation::Name("demo.lib".to_string()), "Demo.Worker")
        .expect("instantiate");
    domain.release_instance(id);
    domain.destroy().expect("destroy");
    domain.destroy().expect("destroy again is a no-op");
    assert!(domain.is_destroyed());

    let err = domain
        .instantiate(ModuleLocation::Name("demo.lib".to_string()), "Demo.Worker")
        .expect_err("destroyed domain refuses work");
    assert!(matches!(err, Error::DomainUnavailable { .. }));
}

fn host_registry_with_demo() -> crate::registry::HostModuleRegistry {
    let registry = crate::registry::HostModuleRegistry::new();
    registry.register_native(ProbeModule::new("demo.lib"));
    registry
}
