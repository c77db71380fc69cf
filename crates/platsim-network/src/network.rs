//! User-facing surface of the network.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use platsim_core::Id;
use platsim_maxmin::SharingPolicy;

use crate::model::{LinkId, NetworkModel, NodeId};

/// Represents a network backed by a [`NetworkModel`].
///
/// Provides node naming, link and route construction and the transfer surface used by
/// the activity layer. Completion is reported to the requester via
/// [`DataTransferCompleted`](crate::events::DataTransferCompleted) and
/// [`DataTransferFailed`](crate::events::DataTransferFailed) events.
pub struct Network {
    model: Rc<RefCell<NetworkModel>>,
    node_ids: FxHashMap<String, NodeId>,
}

impl Network {
    /// Creates the network surface.
    pub fn new(model: Rc<RefCell<NetworkModel>>) -> Self {
        Self {
            model,
            node_ids: FxHashMap::default(),
        }
    }

    /// Adds a named node.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        assert!(!self.node_ids.contains_key(name), "Node {} already exists", name);
        let id = self.model.borrow_mut().add_node();
        self.node_ids.insert(name.to_owned(), id);
        id
    }

    /// Returns the id of a node by its name.
    pub fn node_id(&self, name: &str) -> NodeId {
        *self.node_ids.get(name).unwrap()
    }

    /// Creates and seals a link with the given sharing policy.
    pub fn add_link(&mut self, name: &str, bandwidth: f64, latency: f64, policy: SharingPolicy) -> LinkId {
        let mut model = self.model.borrow_mut();
        let link = model.create_link(name, bandwidth, latency);
        model.set_sharing_policy(link, policy);
        model.seal_link(link);
        link
    }

    /// Registers the route between two nodes.
    pub fn add_route(&mut self, src: NodeId, dst: NodeId, links: Vec<LinkId>) {
        self.model.borrow_mut().add_route(src, dst, links);
    }

    /// Starts a data transfer and returns the request id carried by the completion events.
    pub fn transfer(&mut self, src: NodeId, dst: NodeId, size: f64, requester: Id) -> u64 {
        self.model.borrow_mut().transfer_start(src, dst, size, -1., requester)
    }

    /// Starts a rate-capped data transfer.
    pub fn transfer_with_rate(&mut self, src: NodeId, dst: NodeId, size: f64, rate: f64, requester: Id) -> u64 {
        self.model.borrow_mut().transfer_start(src, dst, size, rate, requester)
    }

    /// Cancels a transfer.
    pub fn cancel(&mut self, request_id: u64) {
        self.model.borrow_mut().cancel(request_id);
    }

    /// Returns the accumulated latency between two nodes.
    pub fn latency(&self, src: NodeId, dst: NodeId) -> f64 {
        self.model.borrow().latency(src, dst)
    }

    /// Returns the bottleneck bandwidth between two nodes.
    pub fn bandwidth(&self, src: NodeId, dst: NodeId) -> f64 {
        self.model.borrow().bandwidth(src, dst)
    }
}
