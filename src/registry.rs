use crate::schema::{ExchangeDeclaration, QueueDeclaration};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// What was declared on one session, so exchanges are declared at most once per connection.
#[derive(Clone, Debug, Default)]
pub(crate) struct Registry(Arc<Mutex<Inner>>);

#[derive(Debug, Default)]
struct Inner {
    exchanges: HashMap<String, ExchangeDeclaration>,
    queues: HashMap<String, QueueDeclaration>,
    bindings: HashSet<(String, String, String)>,
}

impl Registry {
    pub(crate) fn exchange_declared(&self, exchange: &ExchangeDeclaration) -> bool {
        self.0.lock().exchanges.get(&exchange.name) == Some(exchange)
    }

    pub(crate) fn register_exchange(&self, exchange: &ExchangeDeclaration) {
        self.0
            .lock()
            .exchanges
            .insert(exchange.name.clone(), exchange.clone());
    }

    pub(crate) fn binding_declared(&self, queue: &str, exchange: &str, routing_key: &str) -> bool {
        self.0
            .lock()
            .bindings
            .contains(&(queue.into(), exchange.into(), routing_key.into()))
    }

    pub(crate) fn register_binding(&self, queue: &str, exchange: &str, routing_key: &str) {
        self.0
            .lock()
            .bindings
            .insert((queue.into(), exchange.into(), routing_key.into()));
    }

    pub(crate) fn register_queue(&self, queue: &QueueDeclaration) {
        self.0.lock().queues.insert(queue.name.clone(), queue.clone());
    }

    pub(crate) fn queues(&self) -> Vec<String> {
        let mut queues = self.0.lock().queues.keys().cloned().collect::<Vec<_>>();
        queues.sort();
        queues
    }
}
