//! Node groups and selection strategies

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::common::Result;
use crate::error::Error;

use super::route::Hop;

/// How a hop picks one node out of its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Rotate through the candidates
    #[default]
    RoundRobin,
    /// Uniformly random candidate
    Random,
    /// Always the first candidate
    Fifo,
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "round" | "round_robin" | "roundrobin" | "rr" => Ok(Strategy::RoundRobin),
            "rand" | "random" => Ok(Strategy::Random),
            "fifo" | "ha" => Ok(Strategy::Fifo),
            _ => Err(Error::Config(format!("unknown selection strategy: {}", s))),
        }
    }
}

/// Candidates for one hop of a chain
pub struct NodeGroup {
    hops: Vec<Hop>,
    strategy: Strategy,
    next: AtomicUsize,
}

impl NodeGroup {
    pub fn new(hops: Vec<Hop>, strategy: Strategy) -> Self {
        Self {
            hops,
            strategy,
            next: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Pick the node for one route
    pub fn select(&self) -> Result<Hop> {
        if self.hops.is_empty() {
            return Err(Error::Config("node group is empty".into()));
        }

        let index = match self.strategy {
            _ if self.hops.len() == 1 => 0,
            Strategy::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % self.hops.len(),
            Strategy::Random => rand::thread_rng().gen_range(0..self.hops.len()),
            Strategy::Fifo => 0,
        };
        Ok(self.hops[index].clone())
    }
}

impl std::fmt::Debug for NodeGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGroup")
            .field(
                "nodes",
                &self.hops.iter().map(|h| h.node.name.as_str()).collect::<Vec<_>>(),
            )
            .field("strategy", &self.strategy)
            .finish()
    }
}
