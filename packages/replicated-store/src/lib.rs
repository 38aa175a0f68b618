//! Replicated-graph backend for AgentDeck.
//!
//! `GraphClient` is the boundary to an external peer-to-peer graph store;
//! `GraphAdapter` maps the portable adapter contract onto it. Because graph
//! stores cannot enumerate their keys, the shim maintains a key index in a
//! reserved node and serves `list`/`query` from it. `MemoryGraph` is an
//! in-process client for tests and single-node deployments.

mod adapter;
mod graph;

pub use adapter::GraphAdapter;
pub use graph::{ChildCallback, GraphClient, MemoryGraph, NodeCallback, WatchId};
