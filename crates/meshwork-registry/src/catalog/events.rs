use super::wildcard::names_match;
use crate::endpoint::EventEndpoint;
use crate::node::NodeCatalog;
use crate::options::StrategyKind;
use crate::strategy::{build_strategy, Candidate, Strategy};
use meshwork_common::Context;
use std::fmt;

/// One event catalog entry: the endpoints subscribed under a single
/// (event name, group) pair.
pub struct EventEndpointList {
    name: String,
    group: String,
    endpoints: Vec<EventEndpoint>,
    strategy: Box<dyn Strategy>,
}

impl fmt::Debug for EventEndpointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEndpointList")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl EventEndpointList {
    fn new(name: String, group: String, kind: &StrategyKind) -> Self {
        EventEndpointList {
            name,
            group,
            endpoints: Vec::new(),
            strategy: build_strategy(kind),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn endpoints(&self) -> &[EventEndpoint] {
        &self.endpoints
    }

    fn available<'a>(&'a self, nodes: &NodeCatalog) -> Vec<&'a EventEndpoint> {
        self.endpoints
            .iter()
            .filter(|ep| nodes.get(&ep.node_id).map(|n| n.available).unwrap_or(false))
            .collect()
    }

    /// Picks one available endpoint for a balanced emit.
    fn select(
        &self,
        nodes: &NodeCatalog,
        ctx: Option<&Context>,
        prefer_local: bool,
    ) -> Option<EventEndpoint> {
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
}

/// Index of event subscriptions, partitioned by (name, group).
///
/// Entries live in a vec rather than a map because lookup is a wildcard
/// scan, and because consumers depend on registration order as the
/// iteration order for same-priority matches.
pub struct EventCatalog {
    entries: Vec<EventEndpointList>,
    strategy_kind: StrategyKind,
}

impl fmt::Debug for EventCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCatalog")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl EventCatalog {
    pub fn new(strategy_kind: StrategyKind) -> Self {
        EventCatalog {
            entries: Vec::new(),
            strategy_kind,
        }
    }

    /// Adds a subscription endpoint, replacing a previous one from the same
    /// (node, service) within its (name, group) entry.
    pub fn add(&mut self, endpoint: EventEndpoint) {
        let name = endpoint.event.name.clone();
        let group = endpoint.group.clone();
        let idx = match self
            .entries
            .iter()
            .position(|e| e.name == name && e.group == group)
        {
            Some(idx) => idx,
            None => {
                self.entries
                    .push(EventEndpointList::new(name, group, &self.strategy_kind));
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[idx];
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

    /// Drops every subscription owned by a node; empty entries disappear.
    pub fn remove_by_node(&mut self, node_id: &str) {
        self.entries.retain_mut(|entry| {
            entry.endpoints.retain(|ep| ep.node_id != node_id);
            !entry.endpoints.is_empty()
        });
    }

    /// Drops one node's subscriptions for a specific service.
    pub fn remove_by_service(&mut self, node_id: &str, service: &str) {
        self.entries.retain_mut(|entry| {
            entry
                .endpoints
                .retain(|ep| !(ep.node_id == node_id && ep.service == service));
            !entry.endpoints.is_empty()
        });
    }

    /// Balanced resolution: one endpoint per matching group.
    ///
    /// Groups are independent; the optional `groups` filter restricts which
    /// participate. Matching is bidirectional: the registered name or the
    /// emitted name may carry wildcards.
    pub fn balanced(
        &self,
        event: &str,
        groups: Option<&[String]>,
        nodes: &NodeCatalog,
        ctx: Option<&Context>,
        prefer_local: bool,
    ) -> Vec<EventEndpoint> {
        self.matching_entries(event, groups)
            .filter_map(|entry| entry.select(nodes, ctx, prefer_local))
            .collect()
    }

    /// Broadcast resolution: every available matching endpoint, in
    /// registration order, load balancing bypassed.
    pub fn all(
        &self,
        event: &str,
        groups: Option<&[String]>,
        nodes: &NodeCatalog,
    ) -> Vec<EventEndpoint> {
        self.matching_entries(event, groups)
            .flat_map(|entry| entry.available(nodes).into_iter().cloned())
            .collect()
    }

    /// Balanced resolution restricted to local endpoints: one local handler
    /// per matching group. Used when dispatching an inbound balanced EVENT
    /// packet whose sender already routed it to this node.
    pub fn balanced_local(
        &self,
        event: &str,
        groups: Option<&[String]>,
        nodes: &NodeCatalog,
    ) -> Vec<EventEndpoint> {
        self.matching_entries(event, groups)
            .filter_map(|entry| {
                let locals: Vec<&EventEndpoint> = entry
                    .available(nodes)
                    .into_iter()
                    .filter(|ep| ep.local)
                    .collect();
                if locals.is_empty() {
                    return None;
                }
                let candidates: Vec<Candidate<'_>> = locals
                    .iter()
                    .map(|ep| Candidate {
                        node_id: &ep.node_id,
                        local: true,
                        cpu: None,
                    })
                    .collect();
                let idx = entry.strategy.select(&candidates, None)?;
                locals.get(idx).map(|ep| (*ep).clone())
            })
            .collect()
    }

    /// Local-only resolution: matching endpoints on the local node.
    pub fn local(&self, event: &str, nodes: &NodeCatalog) -> Vec<EventEndpoint> {
        self.matching_entries(event, None)
            .flat_map(|entry| {
                entry
                    .endpoints
                    .iter()
                    .filter(|ep| ep.local)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|ep| nodes.get(&ep.node_id).map(|n| n.available).unwrap_or(false))
            .collect()
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &EventEndpointList> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn matching_entries<'a>(
        &'a self,
        event: &'a str,
        groups: Option<&'a [String]>,
    ) -> impl Iterator<Item = &'a EventEndpointList> {
        self.entries.iter().filter(move |entry| {
            names_match(&entry.name, event)
                && groups
                    .map(|gs| gs.iter().any(|g| g == &entry.group))
                    .unwrap_or(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeCatalog};
    use meshwork_common::EventInfo;

    fn endpoint(node_id: &str, service: &str, event: &str, group: &str, local: bool) -> EventEndpoint {
        EventEndpoint {
            node_id: node_id.to_string(),
            service: service.to_string(),
            event: EventInfo::new(event),
            group: group.to_string(),
            local,
            handler: None,
        }
    }

    fn nodes_with(ids: &[&str]) -> NodeCatalog {
        let mut catalog = NodeCatalog::new(Node::new_local("local", "inst"));
        for id in ids {
            catalog.get_or_create_remote(id).available = true;
        }
        catalog
    }

    #[test]
    fn test_balanced_picks_one_per_group() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "mail", "user.created", "mail", false));
        catalog.add(endpoint("node-3", "mail", "user.created", "mail", false));
        catalog.add(endpoint("node-2", "push", "user.created", "push", false));
        let nodes = nodes_with(&["node-2", "node-3"]);

        let picked = catalog.balanced("user.created", None, &nodes, None, true);
        assert_eq!(picked.len(), 2);
        let groups: Vec<&str> = picked.iter().map(|ep| ep.group.as_str()).collect();
        assert_eq!(groups, vec!["mail", "push"]);
    }

    #[test]
    fn test_balanced_group_filter() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "mail", "user.created", "mail", false));
        catalog.add(endpoint("node-2", "push", "user.created", "push", false));
        let nodes = nodes_with(&["node-2"]);

        let only_mail = vec!["mail".to_string()];
        let picked = catalog.balanced("user.created", Some(&only_mail), &nodes, None, true);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].group, "mail");
    }

    #[test]
    fn test_all_returns_every_matching_endpoint() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "mail", "user.created", "mail", false));
        catalog.add(endpoint("node-3", "mail", "user.created", "mail", false));
        catalog.add(endpoint("node-2", "push", "user.created", "push", false));
        let nodes = nodes_with(&["node-2", "node-3"]);

        assert_eq!(catalog.all("user.created", None, &nodes).len(), 3);
    }

    #[test]
    fn test_local_only() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("local", "mail", "user.created", "mail", true));
        catalog.add(endpoint("node-2", "mail", "user.created", "mail", false));
        let nodes = nodes_with(&["node-2"]);

        let picked = catalog.local("user.created", &nodes);
        assert_eq!(picked.len(), 1);
        assert!(picked[0].local);
    }

    #[test]
    fn test_wildcard_subscription_matches_exact_emit() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "audit", "user.*", "audit", false));
        let nodes = nodes_with(&["node-2"]);

        assert_eq!(catalog.all("user.created", None, &nodes).len(), 1);
        assert_eq!(catalog.all("post.created", None, &nodes).len(), 0);
    }

    #[test]
    fn test_exact_subscription_matches_wildcard_broadcast() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "mail", "user.created", "mail", false));
        let nodes = nodes_with(&["node-2"]);

        assert_eq!(catalog.all("user.*", None, &nodes).len(), 1);
    }

    #[test]
    fn test_double_wildcard_subscription_sees_everything() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "audit", "**", "audit", false));
        let nodes = nodes_with(&["node-2"]);

        assert_eq!(catalog.all("user.created", None, &nodes).len(), 1);
        assert_eq!(catalog.all("a.b.c.d", None, &nodes).len(), 1);
    }

    #[test]
    fn test_unavailable_nodes_are_skipped() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "mail", "user.created", "mail", false));
        let mut nodes = nodes_with(&["node-2"]);
        nodes.get_mut("node-2").unwrap().available = false;

        assert!(catalog.all("user.created", None, &nodes).is_empty());
        assert!(catalog.balanced("user.created", None, &nodes, None, true).is_empty());
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "zeta", "user.created", "zeta", false));
        catalog.add(endpoint("node-2", "alpha", "user.created", "alpha", false));
        let nodes = nodes_with(&["node-2"]);

        let all = catalog.all("user.created", None, &nodes);
        let groups: Vec<&str> = all.iter().map(|ep| ep.group.as_str()).collect();
        assert_eq!(groups, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_balanced_round_robins_within_group() {
        let mut catalog = EventCatalog::new(StrategyKind::RoundRobin);
        catalog.add(endpoint("node-2", "mail", "user.created", "mail", false));
        catalog.add(endpoint("node-3", "mail", "user.created", "mail", false));
        let nodes = nodes_with(&["node-2", "node-3"]);

        let picks: Vec<String> = (0..4)
            .map(|_| {
                catalog.balanced("user.created", None, &nodes, None, true)[0]
                    .node_id
                    .clone()
            })
            .collect();
        assert_eq!(
            picks,
            vec!["node-2", "node-3", "node-2", "node-3"]
        );
    }
}
