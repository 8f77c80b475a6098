mod node_registry;

pub use node_registry::NodeRegistry;
