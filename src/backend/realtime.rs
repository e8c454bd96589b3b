use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use tokio::sync::mpsc;

use crate::{
    domain::{
        events::{RealtimeEvent, SubscriptionScope},
        message::Message,
    },
    usecases::contracts::Subscription,
};

const REALTIME_SUBSCRIBED: &str = "REALTIME_CHANNEL_SUBSCRIBED";
const REALTIME_REMOVED: &str = "REALTIME_CHANNEL_REMOVED";
const REALTIME_SUBSCRIBER_GONE: &str = "REALTIME_SUBSCRIBER_GONE";

/// In-process pub/sub fan-out of message inserts.
#[derive(Debug, Clone, Default)]
pub struct RealtimeHub {
    inner: Arc<Mutex<HubState>>,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
}

#[derive(Debug)]
struct Subscriber {
    scope: SubscriptionScope,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();

        let id = match self.inner.lock() {
            Ok(mut state) => {
                let id = state.next_id;
                state.next_id += 1;
                state.subscribers.insert(id, Subscriber { scope, tx });
                Some(id)
            }
            Err(_) => None,
        };

        tracing::debug!(
            code = REALTIME_SUBSCRIBED,
            topic = %scope.topic(),
            "realtime channel subscribed"
        );

        let registry = Arc::downgrade(&self.inner);
        Subscription::new(scope, rx, move || {
            if let Some(id) = id {
                remove_subscriber(&registry, id, scope);
            }
        })
    }

    /// Delivers an insert to every matching subscriber. Returns the number of deliveries.
    pub fn publish(&self, message: &Message) -> usize {
        let Ok(mut state) = self.inner.lock() else {
            return 0;
        };

        let mut delivered = 0;
        state.subscribers.retain(|id, subscriber| {
            if !subscriber.scope.matches(message) {
                return true;
            }

            match subscriber
                .tx
                .send(RealtimeEvent::MessageInserted(message.clone()))
            {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    tracing::debug!(
                        code = REALTIME_SUBSCRIBER_GONE,
                        subscriber = id,
                        "dropping subscriber with closed receiver"
                    );
                    false
                }
            }
        });

        delivered
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn active_subscriptions(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.subscribers.len())
            .unwrap_or_default()
    }
}

fn remove_subscriber(registry: &Weak<Mutex<HubState>>, id: u64, scope: SubscriptionScope) {
    let Some(inner) = registry.upgrade() else {
        return;
    };

    let Ok(mut state) = inner.lock() else {
        return;
    };

    if state.subscribers.remove(&id).is_some() {
        tracing::debug!(
            code = REALTIME_REMOVED,
            topic = %scope.topic(),
            "realtime channel removed"
        );
    }
}
