use crate::endpoint::ActionEndpoint;
use crate::node::NodeCatalog;
use crate::options::StrategyKind;
use crate::strategy::{build_strategy, Candidate, Strategy};
use meshwork_common::Context;
use std::collections::HashMap;
use std::fmt;

/// One catalog entry: the insertion-ordered endpoints for a single action
/// name, plus that entry's own strategy instance.
pub struct ActionEndpointList {
    name: String,
    endpoints: Vec<ActionEndpoint>,
    strategy: Box<dyn Strategy>,
}

impl fmt::Debug for ActionEndpointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEndpointList")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl ActionEndpointList {
    fn new(name: String, kind: &StrategyKind) -> Self {
        ActionEndpointList {
            name,
            endpoints: Vec::new(),
            strategy: build_strategy(kind),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[ActionEndpoint] {
        &self.endpoints
    }

    /// Endpoints whose node is currently available and whose breaker is not
    /// open, in insertion order.
    pub fn available<'a>(&'a self, nodes: &NodeCatalog) -> Vec<&'a ActionEndpoint> {
        self.endpoints
            .iter()
            .filter(|ep| {
                nodes.get(&ep.node_id).map(|n| n.available).unwrap_or(false)
                    && ep.breaker.is_available()
            })
            .collect()
    }

    pub fn has_available(&self, nodes: &NodeCatalog) -> bool {
        !self.available(nodes).is_empty()
    }

    /// Picks one available endpoint via this entry's strategy.
    ///
    /// With `prefer_local`, any available local endpoint short-circuits load
    /// balancing across the cluster.
    pub fn select(
        &self,
        nodes: &NodeCatalog,
        ctx: Option<&Context>,
        prefer_local: bool,
    ) -> Option<ActionEndpoint> {
        let mut available = self.available(nodes);
        if available.is_empty() {
            return None;
        }
        if prefer_local && available.iter().any(|ep| ep.local) {
            available.retain(|ep| ep.local);
        }
        let candidates: Vec<Candidate<'_>> = available
            .iter()
            .map(|ep| Candidate {
                node_id: &ep.node_id,
                local: ep.local,
                cpu: nodes.get(&ep.node_id).and_then(|n| n.cpu),
            })
            .collect();
        let idx = self.strategy.select(&candidates, ctx)?;
        available.get(idx).map(|ep| (*ep).clone())
    }

    /// Resolves the endpoint pinned to a specific node, available or not.
    pub fn get_by_node(&self, node_id: &str) -> Option<&ActionEndpoint> {
        self.endpoints.iter().find(|ep| ep.node_id == node_id)
    }
}

/// Index from action name to its endpoint list.
///
/// Invariants: an entry is removed entirely when its endpoint list empties,
/// and an entry never holds two endpoints for the same (node, service).
pub struct ActionCatalog {
    entries: HashMap<String, ActionEndpointList>,
    /// Entry names in first-registration order, for deterministic listings.
    order: Vec<String>,
    strategy_kind: StrategyKind,
}

impl fmt::Debug for ActionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCatalog")
            .field("entries", &self.order)
            .finish()
    }
}

impl ActionCatalog {
    pub fn new(strategy_kind: StrategyKind) -> Self {
        ActionCatalog {
            entries: HashMap::new(),
            order: Vec::new(),
            strategy_kind,
        }
    }

    /// Adds an endpoint, replacing a previous one from the same
    /// (node, service).
    pub fn add(&mut self, endpoint: ActionEndpoint) {
        let name = endpoint.action.name.clone();
        if !self.entries.contains_key(&name) {
            self.order.push(name.clone());
            self.entries.insert(
                name.clone(),
                ActionEndpointList::new(name.clone(), &self.strategy_kind),
            );
        }
        let entry = self.entries.get_mut(&name).expect("entry just ensured");
        if let Some(existing) = entry
            .endpoints
            .iter_mut()
            .find(|ep| ep.key() == endpoint.key())
        {
            *existing = endpoint;
        } else {
            entry.endpoints.push(endpoint);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ActionEndpointList> {
        self.entries.get(name)
    }

    /// Drops every endpoint owned by a node. Entries that empty out are
    /// removed from the catalog.
    pub fn remove_by_node(&mut self, node_id: &str) {
        self.entries.retain(|_, entry| {
            entry.endpoints.retain(|ep| ep.node_id != node_id);
            !entry.endpoints.is_empty()
        });
        self.order.retain(|name| self.entries.contains_key(name));
    }

    /// Drops every endpoint owned by one (node, service) pair. A sibling
    /// service on the same node sharing an action name keeps its endpoint.
    pub fn remove_by_service(&mut self, node_id: &str, service: &str) {
        self.entries.retain(|_, entry| {
            entry
                .endpoints
                .retain(|ep| ep.node_id != node_id || ep.service != service);
            !entry.endpoints.is_empty()
        });
        self.order.retain(|name| self.entries.contains_key(name));
    }

    /// Entries in first-registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ActionEndpointList> {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreaker, CircuitBreakerOptions};
    use crate::node::{Node, NodeCatalog};
    use meshwork_common::ActionInfo;
    use tokio::sync::mpsc::unbounded_channel;

    fn endpoint(node_id: &str, service: &str, action: &str, local: bool) -> ActionEndpoint {
        let (tx, _rx) = unbounded_channel();
        ActionEndpoint {
            node_id: node_id.to_string(),
            service: service.to_string(),
            action: ActionInfo::new(action),
            local,
            handler: None,
            breaker: CircuitBreaker::new(node_id, action, CircuitBreakerOptions::default(), tx),
        }
    }

    fn nodes_with(ids: &[&str]) -> NodeCatalog {
        let mut catalog = NodeCatalog::new(Node::new_local("local", "inst"));
        for id in ids {
            let node = catalog.get_or_create_remote(id);
            node.available = true;
        }
        catalog
    }

    #[test]
    fn test_add_and_get() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        assert_eq!(catalog.get("math.add").unwrap().endpoints().len(), 1);
        assert!(catalog.get("math.sub").is_none());
    }

    #[test]
    fn test_duplicate_node_service_is_replaced() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.add(endpoint("node-2", "math", "math.add", false));
        assert_eq!(catalog.get("math.add").unwrap().endpoints().len(), 1);
    }

    #[test]
    fn test_empty_entry_is_dropped() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.remove_by_node("node-2");
        assert!(catalog.get("math.add").is_none());
        assert_eq!(catalog.len(), 0);
    }

    #[test]
    fn test_remove_by_service_keeps_other_nodes() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.add(endpoint("node-3", "math", "math.add", false));
        catalog.remove_by_service("node-2", "math");
        let entry = catalog.get("math.add").unwrap();
        assert_eq!(entry.endpoints().len(), 1);
        assert_eq!(entry.endpoints()[0].node_id, "node-3");
    }

    #[test]
    fn test_remove_by_service_keeps_sibling_service_sharing_the_name() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.add(endpoint("node-2", "calc", "math.add", false));
        catalog.remove_by_service("node-2", "math");
        let entry = catalog.get("math.add").unwrap();
        assert_eq!(entry.endpoints().len(), 1);
        assert_eq!(entry.endpoints()[0].service, "calc");
    }

    #[test]
    fn test_select_skips_unavailable_nodes() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.add(endpoint("node-3", "math", "math.add", false));

        let mut nodes = nodes_with(&["node-2", "node-3"]);
        nodes.get_mut("node-2").unwrap().available = false;

        let entry = catalog.get("math.add").unwrap();
        for _ in 0..5 {
            let picked = entry.select(&nodes, None, true).unwrap();
            assert_eq!(picked.node_id, "node-3");
        }
    }

    #[test]
    fn test_select_returns_none_when_all_down() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        let mut nodes = nodes_with(&["node-2"]);
        nodes.get_mut("node-2").unwrap().available = false;

        let entry = catalog.get("math.add").unwrap();
        assert!(entry.select(&nodes, None, true).is_none());
        assert!(!entry.has_available(&nodes));
    }

    #[test]
    fn test_prefer_local_restricts_to_local_endpoints() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.add(endpoint("local", "math", "math.add", true));
        let nodes = nodes_with(&["node-2"]);

        let entry = catalog.get("math.add").unwrap();
        for _ in 0..10 {
            assert!(entry.select(&nodes, None, true).unwrap().local);
        }
    }

    #[test]
    fn test_prefer_local_disabled_balances_across_all() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.add(endpoint("local", "math", "math.add", true));
        let nodes = nodes_with(&["node-2"]);

        let entry = catalog.get("math.add").unwrap();
        let mut saw_remote = false;
        for _ in 0..10 {
            if !entry.select(&nodes, None, false).unwrap().local {
                saw_remote = true;
            }
        }
        assert!(saw_remote);
    }

    #[test]
    fn test_round_robin_across_entry() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.add", false));
        catalog.add(endpoint("node-3", "math", "math.add", false));
        let nodes = nodes_with(&["node-2", "node-3"]);

        let entry = catalog.get("math.add").unwrap();
        let picks: Vec<String> = (0..4)
            .map(|_| entry.select(&nodes, None, true).unwrap().node_id)
            .collect();
        assert_eq!(picks, vec!["node-2", "node-3", "node-2", "node-3"]);
    }

    #[test]
    fn test_iteration_order_is_registration_order() {
        let mut catalog = ActionCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "math", "math.sub", false));
        catalog.add(endpoint("node-2", "math", "math.add", false));
        let names: Vec<&str> = catalog.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["math.sub", "math.add"]);
    }
}
