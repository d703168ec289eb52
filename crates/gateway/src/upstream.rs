use std::sync::atomic::{AtomicUsize, Ordering};
use tixgate_common::UpstreamConfig;

/// The servers behind one named upstream of the ticketing backend, picked
/// by weighted round-robin.
pub struct UpstreamPool {
    pub name: String,
    /// Each server address repeated `weight` times.
    rotation: Vec<String>,
    cursor: AtomicUsize,
}

impl UpstreamPool {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        let mut rotation: Vec<String> = config
            .servers
            .iter()
            .flat_map(|s| std::iter::repeat(s.addr.clone()).take(s.weight as usize))
            .collect();

        // All weights zero: treat every server as weight 1.
        if rotation.is_empty() {
            rotation = config.servers.iter().map(|s| s.addr.clone()).collect();
        }

        Self {
            name: config.name.clone(),
            rotation,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next server address, or `None` for an empty pool.
    pub fn select(&self) -> Option<&str> {
        if self.rotation.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.rotation.len();
        Some(&self.rotation[idx])
    }
}
