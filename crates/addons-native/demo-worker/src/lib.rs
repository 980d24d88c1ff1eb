//! Demonstration addon module.
//!
//! Built as a `cdylib` so it can be loaded into an isolation domain through
//! the versioned ABI, and as an `rlib` so hosts can register the same types
//! as a native in-host module.

use anyhow::{anyhow, Result};
use cloister_addon_api::{export_addon_module, Addon, AddonTypeExport};
use serde::Serialize;

pub const MODULE_NAME: &str = "demo.lib";

#[derive(Serialize)]
struct Greeting<'a> {
    greeting: String,
    subject: &'a str,
    calls: u64,
}

/// Worker that greets callers and keeps a little state across calls.
#[derive(Default)]
pub struct DemoWorker {
    calls: u64,
}

impl Addon for DemoWorker {
    fn call(&mut self, method: &str, args_json: &str) -> Result<String> {
        match method {
            "hello" => {
                self.calls += 1;
                let subject: String =
                    serde_json::from_str(args_json).unwrap_or_else(|_| "world".to_string());
                let reply = Greeting {
                    greeting: format!("hello, {subject}"),
                    subject: &subject,
                    calls: self.calls,
                };
                Ok(serde_json::to_string(&reply)?)
            }
            other => Err(anyhow!("DemoWorker has no method `{other}`")),
        }
    }
}

/// Echoes whatever it is given; handy for wire-level checks.
#[derive(Default)]
pub struct DemoEcho;

impl Addon for DemoEcho {
    fn call(&mut self, method: &str, args_json: &str) -> Result<String> {
        match method {
            "echo" => Ok(args_json.to_string()),
            other => Err(anyhow!("DemoEcho has no method `{other}`")),
        }
    }
}

fn make_worker() -> Box<dyn Addon> {
    Box::new(DemoWorker::default())
}

fn make_echo() -> Box<dyn Addon> {
    Box::new(DemoEcho)
}

pub const EXPORTS: &[AddonTypeExport] = &[
    AddonTypeExport {
        type_name: "Demo.Worker",
        summary: "stateful greeter",
        construct: make_worker,
    },
    AddonTypeExport {
        type_name: "Demo.Echo",
        summary: "argument echo",
        construct: make_echo,
    },
];

export_addon_module!(MODULE_NAME, EXPORTS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_counts_calls_and_greets() {
        let mut worker = DemoWorker::default();
        let reply = worker.call("hello", "\"tests\"").expect("hello");
        assert!(reply.contains("hello, tests"));
        assert!(reply.contains("\"calls\":1"));
        let reply = worker.call("hello", "\"tests\"").expect("hello again");
        assert!(reply.contains("\"calls\":2"));
    }

    #[test]
    fn unknown_methods_are_rejected() {
        let mut echo = DemoEcho;
        assert!(echo.call("nope", "{}").is_err());
        assert_eq!(echo.call("echo", "[1,2]").expect("echo"), "[1,2]");
    }
}
