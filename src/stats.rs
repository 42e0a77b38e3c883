use std::{collections::HashMap, fmt::Display, sync::Mutex};

use crate::{error::StatsError, ListenerAddress};

/// Counters maintained by acceptors, per (protocol, listen address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    /// Connections accepted while admitting load (counted before tuning and hand-off).
    Accepted,
    /// Connections accepted and immediately closed while suspended.
    Limited,
}

impl Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Counter::Accepted => "accepted".fmt(f),
            Counter::Limited => "limited".fmt(f),
        }
    }
}

/// Destination of acceptor counters. Shared between acceptors, so increments must be atomic.
pub trait StatsSink: Send + Sync {
    /// Add `amount` to `counter` of `(protocol, listener)`.
    ///
    /// # Errors
    ///
    /// When the sink cannot take updates, typically [`StatsError::Unavailable`] packed in an I/O error.
    fn increment_counter(
        &self,
        protocol: &str,
        listener: &ListenerAddress,
        counter: Counter,
        amount: u64,
    ) -> std::io::Result<()>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStats;

impl StatsSink for NoStats {
    fn increment_counter(
        &self,
        _protocol: &str,
        _listener: &ListenerAddress,
        _counter: Counter,
        _amount: u64,
    ) -> std::io::Result<()> {
        Ok(())
    }
}

type Key = (String, ListenerAddress, Counter);

/// In-memory counter table.
///
/// After [`Counters::close`] every increment fails with [`StatsError::Unavailable`].
#[derive(Debug)]
pub struct Counters {
    table: Mutex<Option<HashMap<Key, u64>>>,
}

impl Counters {
    /// Empty, open table.
    #[must_use]
    pub fn new() -> Self {
        Counters {
            table: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Current value of a counter; zero if never incremented or if the table is closed.
    #[must_use]
    pub fn get(&self, protocol: &str, listener: &ListenerAddress, counter: Counter) -> u64 {
        let table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        table
            .as_ref()
            .and_then(|t| t.get(&(protocol.to_owned(), listener.clone(), counter)))
            .copied()
            .unwrap_or(0)
    }

    /// Stop accepting updates and drop collected values.
    pub fn close(&self) {
        *self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}

impl Default for Counters {
    fn default() -> Self {
        Counters::new()
    }
}

impl StatsSink for Counters {
    fn increment_counter(
        &self,
        protocol: &str,
        listener: &ListenerAddress,
        counter: Counter,
        amount: u64,
    ) -> std::io::Result<()> {
        let mut table = self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(t) = table.as_mut() else {
            return StatsError::Unavailable.to_io();
        };
        let v = t
            .entry((protocol.to_owned(), listener.clone(), counter))
            .or_insert(0);
        *v = v.saturating_add(amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_key() {
        let c = Counters::new();
        let a: ListenerAddress = "127.0.0.1:1".parse().unwrap();
        let b: ListenerAddress = "127.0.0.1:2".parse().unwrap();
        c.increment_counter("http", &a, Counter::Accepted, 1).unwrap();
        c.increment_counter("http", &a, Counter::Accepted, 2).unwrap();
        c.increment_counter("http", &b, Counter::Limited, 1).unwrap();
        assert_eq!(c.get("http", &a, Counter::Accepted), 3);
        assert_eq!(c.get("http", &a, Counter::Limited), 0);
        assert_eq!(c.get("http", &b, Counter::Limited), 1);
        assert_eq!(c.get("smtp", &a, Counter::Accepted), 0);
    }

    #[test]
    fn closed_table_refuses_updates() {
        let c = Counters::new();
        let a: ListenerAddress = "127.0.0.1:1".parse().unwrap();
        c.close();
        let e = c.increment_counter("http", &a, Counter::Accepted, 1).unwrap_err();
        assert!(e.to_string().contains("unavailable"));
    }
}
