//! Peer table of the demultiplexer

use std::collections::HashMap;

use parking_lot::Mutex;

use super::UdpConn;

/// Live pseudo-connections keyed by the peer address string.
///
/// The lock is only held for map operations and non-blocking queue pushes,
/// never across an await point.
pub(crate) struct ConnPool {
    conns: Mutex<HashMap<String, UdpConn>>,
}

impl ConnPool {
    pub(crate) fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live connection for `key`, or run `create` under the same
    /// lock and insert what it yields. `create` returning `None` refuses the
    /// peer and leaves the table unchanged.
    pub(crate) fn get_or_create<F>(&self, key: &str, create: F) -> Option<UdpConn>
    where
        F: FnOnce() -> Option<UdpConn>,
    {
        let mut conns = self.conns.lock();
        if let Some(conn) = conns.get(key) {
            if !conn.is_closed() {
                return Some(conn.clone());
            }
        }

        let conn = create()?;
        conns.insert(key.to_string(), conn.clone());
        Some(conn)
    }

    pub(crate) fn len(&self) -> usize {
        self.conns.lock().len()
    }

    /// One idle-check tick: drop closed entries, evict entries already
    /// marked idle, mark the rest. Returns `(size, evicted)`.
    pub(crate) fn sweep(&self) -> (usize, usize) {
        let mut conns = self.conns.lock();
        let size = conns.len();
        let mut evicted = 0;

        conns.retain(|_, conn| {
            if conn.is_closed() {
                return false;
            }
            if conn.is_idle() {
                conn.close();
                evicted += 1;
                return false;
            }
            conn.set_idle(true);
            true
        });

        (size, evicted)
    }

    /// Close and forget every connection
    pub(crate) fn close_all(&self) {
        let drained: Vec<UdpConn> = self.conns.lock().drain().map(|(_, conn)| conn).collect();
        for conn in drained {
            conn.close();
        }
    }
}
