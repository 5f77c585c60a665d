use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::node::Node;

type NodeFactory = Box<dyn Fn() -> Box<dyn Node> + Send + Sync>;

/// Maps node kind strings to constructors so a serialized topology can be
/// reconstructed.
///
/// The process-wide instance ([`NodeRegistry::global`]) is the only global
/// state of the runtime besides the per-pipeline event bus. It is initialized
/// lazily on first access and lives for the rest of the process.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn() -> Box<dyn Node> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    pub fn create(&self, kind: &str) -> Result<Box<dyn Node>> {
        match self.factories.get(kind) {
            Some(f) => Ok(f()),
            None => Err(Error::UnknownNodeKind(kind.to_string())),
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn global() -> &'static Mutex<NodeRegistry> {
        static GLOBAL: OnceLock<Mutex<NodeRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Mutex::new(NodeRegistry::new()))
    }
}
