use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::registry::NodeRegistry;

/// Serialized form of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeSpec {
    name: String,
    kind: String,
    #[serde(default)]
    is_source: bool,
    #[serde(default)]
    config: Option<String>,
    #[serde(default)]
    queue_sizes: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeSpec {
    from: (String, usize),
    to: (String, usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TopologySpec {
    nodes: Vec<NodeSpec>,
    edges: Vec<EdgeSpec>,
}

impl Pipeline {
    /// Serialize the graph (nodes, edges, queue sizes, configuration
    /// strings) to JSON. Converter functions are not serializable and are
    /// omitted; a reconstructed graph carries plain edges.
    pub fn serialize_topology_to_string(&self) -> Result<String> {
        let cells = self.cells();
        let nodes = cells
            .iter()
            .map(|c| NodeSpec {
                name: c.name.clone(),
                kind: c.kind.clone(),
                is_source: c.is_source,
                config: c.config_str.clone(),
                queue_sizes: c.queue_sizes.clone(),
            })
            .collect();
        let edges = self
            .edges()
            .iter()
            .map(|e| EdgeSpec {
                from: (cells[e.from.0].name.clone(), e.from.1),
                to: (cells[e.to.0].name.clone(), e.to.1),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&TopologySpec { nodes, edges })?)
    }

    pub fn serialize_topology_to_json(&self, path: &std::path::Path) -> Result<()> {
        std::fs::write(path, self.serialize_topology_to_string()?)?;
        Ok(())
    }

    /// Rebuild a pipeline from a serialized topology, constructing nodes
    /// through `registry`.
    pub fn from_topology(json: &str, registry: &NodeRegistry) -> Result<Pipeline> {
        let spec: TopologySpec = serde_json::from_str(json)?;
        let mut pipeline = Pipeline::new();
        for n in &spec.nodes {
            let node = registry.create(&n.kind)?;
            if n.is_source {
                pipeline.set_source(node, &n.name)?;
            } else {
                pipeline.add_node(node, &n.name)?;
            }
            if let Some(config) = &n.config {
                pipeline.configure_node_by_string(&n.name, config)?;
            }
            for (port, &size) in n.queue_sizes.iter().enumerate() {
                pipeline.set_node_queue_size(&n.name, port, size)?;
            }
        }
        for e in &spec.edges {
            pipeline.link_node(&e.from.0, e.from.1, &e.to.0, e.to.1, None)?;
        }
        Ok(pipeline)
    }
}
