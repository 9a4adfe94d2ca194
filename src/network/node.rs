use log::error;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    addr: String,
}

impl Node {
    fn new(addr: String) -> Node {
        Node { addr }
    }

    pub fn get_addr(&self) -> &str {
        &self.addr
    }
}

/// Known-node address set, in first-seen order
pub struct Nodes {
    inner: RwLock<Vec<Node>>,
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(vec![]),
        }
    }

    /// Returns false when the address was already known
    pub fn add_node(&self, addr: &str) -> bool {
        match self.inner.write() {
            Ok(mut inner) => {
                if inner.iter().any(|x| x.get_addr() == addr) {
                    return false;
                }
                inner.push(Node::new(addr.to_string()));
                true
            }
            Err(_) => {
                error!("Failed to acquire write lock on known nodes");
                false
            }
        }
    }

    pub fn evict_node(&self, addr: &str) {
        match self.inner.write() {
            Ok(mut inner) => {
                if let Some(idx) = inner.iter().position(|x| x.get_addr() == addr) {
                    inner.remove(idx);
                }
            }
            Err(_) => error!("Failed to acquire write lock on known nodes"),
        }
    }

    pub fn get_nodes(&self) -> Vec<Node> {
        match self.inner.read() {
            Ok(inner) => inner.to_vec(),
            Err(_) => {
                error!("Failed to acquire read lock on known nodes");
                Vec::new()
            }
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.get_nodes()
            .into_iter()
            .map(|node| node.addr)
            .collect()
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => {
                error!("Failed to acquire read lock on known nodes");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        match self.inner.read() {
            Ok(inner) => inner.iter().any(|x| x.get_addr() == addr),
            Err(_) => {
                error!("Failed to acquire read lock on known nodes");
                false
            }
        }
    }
}
