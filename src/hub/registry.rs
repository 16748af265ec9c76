//! Subscription registry
//!
//! Many-to-many relation between clients and symbols, indexed both ways.
//! Empty entries are pruned on every removal so the poller never fetches a
//! symbol nobody watches.

use std::collections::{BTreeSet, HashMap, HashSet};

pub type ClientId = u64;

#[derive(Debug, Default)]
pub struct Registry {
    by_symbol: HashMap<String, HashSet<ClientId>>,
    by_client: HashMap<ClientId, HashSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Returns false if it already existed.
    pub fn subscribe(&mut self, client: ClientId, symbol: &str) -> bool {
        let added = self
            .by_client
            .entry(client)
            .or_default()
            .insert(symbol.to_string());
        if added {
            self.by_symbol
                .entry(symbol.to_string())
                .or_default()
                .insert(client);
        }
        added
    }

    /// Remove a subscription. Returns false if there was none.
    pub fn unsubscribe(&mut self, client: ClientId, symbol: &str) -> bool {
        let removed = match self.by_client.get_mut(&client) {
            Some(symbols) => {
                let removed = symbols.remove(symbol);
                if symbols.is_empty() {
                    self.by_client.remove(&client);
                }
                removed
            }
            None => false,
        };
        if removed {
            self.drop_from_symbol(symbol, client);
        }
        removed
    }

    /// Drop every subscription of `client`. Returns how many there were.
    pub fn remove_client(&mut self, client: ClientId) -> usize {
        let Some(symbols) = self.by_client.remove(&client) else {
            return 0;
        };
        for symbol in &symbols {
            self.drop_from_symbol(symbol, client);
        }
        symbols.len()
    }

    fn drop_from_symbol(&mut self, symbol: &str, client: ClientId) {
        if let Some(clients) = self.by_symbol.get_mut(symbol) {
            clients.remove(&client);
            if clients.is_empty() {
                self.by_symbol.remove(symbol);
            }
        }
    }

    pub fn clients_for(&self, symbol: &str) -> impl Iterator<Item = ClientId> + '_ {
        self.by_symbol
            .get(symbol)
            .into_iter()
            .flat_map(|clients| clients.iter().copied())
    }

    pub fn subscription_count(&self, client: ClientId) -> usize {
        self.by_client.get(&client).map_or(0, HashSet::len)
    }

    pub fn is_subscribed(&self, client: ClientId, symbol: &str) -> bool {
        self.by_client
            .get(&client)
            .is_some_and(|symbols| symbols.contains(symbol))
    }

    /// Distinct subscribed symbols, sorted for stable batching.
    pub fn symbols(&self) -> Vec<String> {
        self.by_symbol
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn symbol_count(&self) -> usize {
        self.by_symbol.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_are_distinct() {
        let mut r = Registry::new();
        assert!(r.subscribe(1, "AAPL"));
        assert!(r.subscribe(2, "AAPL"));
        assert!(r.subscribe(2, "MSFT"));
        assert!(!r.subscribe(2, "MSFT"));
        assert_eq!(r.symbols(), vec!["AAPL", "MSFT"]);

        let mut aapl: Vec<_> = r.clients_for("AAPL").collect();
        aapl.sort();
        assert_eq!(aapl, vec![1, 2]);
        assert_eq!(r.clients_for("MSFT").collect::<Vec<_>>(), vec![2]);
        assert_eq!(r.clients_for("TSLA").count(), 0);
    }

    #[test]
    fn test_unsubscribe_prunes_empty_symbols() {
        let mut r = Registry::new();
        r.subscribe(1, "AAPL");
        r.subscribe(2, "AAPL");
        assert!(r.unsubscribe(1, "AAPL"));
        assert!(!r.unsubscribe(1, "AAPL"));
        assert_eq!(r.symbols(), vec!["AAPL"]);
        assert!(r.unsubscribe(2, "AAPL"));
        assert!(r.symbols().is_empty());
        assert_eq!(r.subscription_count(2), 0);
    }

    #[test]
    fn test_remove_client_drops_all_its_subscriptions() {
        let mut r = Registry::new();
        r.subscribe(1, "AAPL");
        r.subscribe(1, "MSFT");
        r.subscribe(2, "MSFT");
        assert_eq!(r.remove_client(1), 2);
        assert_eq!(r.remove_client(1), 0);
        assert_eq!(r.symbols(), vec!["MSFT"]);
        assert!(!r.is_subscribed(1, "MSFT"));
        assert!(r.is_subscribed(2, "MSFT"));
        assert_eq!(r.symbol_count(), 1);
    }
}
