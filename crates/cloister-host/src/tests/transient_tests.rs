use crate::error::Error;
use crate::host::AddonHost;
use crate::tests::support::ProbeModule;

fn demo_host() -> AddonHost {
    let host = AddonHost::new().expect("host");
    host.register_native_module(ProbeModule::new("demo.lib"));
    host
}

#[test]
fn execute_runs_on_a_throwaway_domain_worker() {
    let host = demo_host();
    let thread_name = host
        .execute("", 21u64, |state| {
            let name = std::thread::current()
                .name()
                .unwrap_or("unnamed")
                .to_string();
            Ok(format!("{name}:{}", state * 2))
        })
        .expect("execute");
    assert!(thread_name.starts_with("cloister-domain-transient-"));
    assert!(thread_name.ends_with(":42"));
}

#[test]
fn execute_captures_errors_instead_of_raising() {
    let host = demo_host();
    let out: Result<u32, Error> =
        host.execute("", (), |()| Err(anyhow::anyhow!("task went sideways")));
    let err = out.expect_err("error must be captured");
    assert!(matches!(err, Error::Invocation { .. }));
    assert!(err.to_string().contains("task went sideways"));
}

#[test]
fn execute_captures_panics_and_leaves_no_residue() {
    let host = demo_host();
    let out: Result<u32, Error> = host.execute("", (), |()| panic!("transient task panicked"));
    let err = out.expect_err("panic must be captured");
    assert!(err.to_string().contains("transient task panicked"));

    // The failed run tore its domain down; an unrelated run starts clean.
    let value = host
        .execute("", 5u32, |state| Ok(state + 1))
        .expect("subsequent execute");
    assert_eq!(value, 6);
}

#[test]
fn query_type_hands_the_instance_to_the_closure() {
    let host = demo_host();
    let reply = host
        .query_type("demo.lib", "Demo.Worker, demo", "", "\"ping\"", |cell, state| {
            cell.start()?;
            let reply = cell.call("hello", state)?;
            cell.stop()?;
            Ok(reply)
        })
        .expect("query type");
    assert!(reply.contains("\"calls\":1"));
    assert!(reply.contains("cloister-domain-query-"));
}

#[test]
fn query_type_reports_unknown_types_and_recovers() {
    let host = demo_host();
    let err = host
        .query_type("demo.lib", "Demo.Missing", "", (), |_cell, ()| Ok(0u8))
        .expect_err("unknown type");
    assert!(matches!(err, Error::Instantiation { .. }));

    let err = host
        .query_type("ghost.lib", "Demo.Worker", "", (), |_cell, ()| Ok(0u8))
        .expect_err("unknown module");
    assert!(matches!(err, Error::ModuleNotFound { .. }));

    // Failures left nothing behind.
    let ok = host
        .query_type("demo.lib", "Demo.Worker", "", (), |cell, ()| {
            cell.call("hello", "\"x\"")
        })
        .expect("clean run after failures");
    assert!(ok.contains("\"calls\":1"));
}
