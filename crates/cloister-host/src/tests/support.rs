use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use cloister_addon_api::Addon;

use crate::registry::NativeModule;

pub fn unique_temp_dir(suffix: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!(
        "cloister-test-{}-{ts}-{suffix}",
        std::process::id()
    ))
}

pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, b"x").expect("write temp file");
}

/// Addon that reports which thread ran it, so tests can prove where a call
/// actually executed.
#[derive(Default)]
pub struct ProbeAddon {
    pub calls: u64,
}

impl Addon for ProbeAddon {
    fn call(&mut self, method: &str, args_json: &str) -> Result<String> {
        self.calls += 1;
        match method {
            "hello" => {
                let thread = std::thread::current()
                    .name()
                    .unwrap_or("unnamed")
                    .to_string();
                Ok(format!(
                    "{{\"echo\":{args_json:?},\"thread\":{thread:?},\"calls\":{}}}",
                    self.calls
                ))
            }
            "fail" => Err(anyhow!("requested failure: {args_json}")),
            "panic" => panic!("probe addon asked to panic"),
            other => Err(anyhow!("no method `{other}`")),
        }
    }
}

/// In-host test module exporting a couple of probe types.
pub struct ProbeModule {
    name: String,
    created: AtomicU64,
}

impl ProbeModule {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            created: AtomicU64::new(0),
        })
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl NativeModule for ProbeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_names(&self) -> Vec<String> {
        vec!["Demo.Worker".to_string(), "Demo.Echo".to_string()]
    }

    fn create(&self, type_name: &str) -> Result<Box<dyn Addon>> {
        match type_name {
            "Demo.Worker" | "Demo.Echo" => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(Box::new(ProbeAddon::default()))
            }
            other => Err(anyhow!("type `{other}` is not exported")),
        }
    }
}
