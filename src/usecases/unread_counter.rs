//! Global unread badge.
//!
//! The count is recomputed by the store whenever the signed-in user changes, the
//! visible route changes, or any message is inserted anywhere. Only the most
//! recently issued recount may update the badge; a recount issued for an earlier
//! identity or overtaken by a newer one is dropped.

use std::sync::{Arc, Mutex, Weak};

use tokio::{sync::watch, task::JoinHandle};

use crate::domain::{
    events::{Route, SubscriptionScope},
    identity::{AuthContext, Identity},
    unread::UnreadBadge,
};

use super::{contracts::ChatBackend, read_state::fetch_unread_count};

const UNREAD_MONITOR_STARTED: &str = "CHAT_UNREAD_MONITOR_STARTED";
const UNREAD_MONITOR_STOPPED: &str = "CHAT_UNREAD_MONITOR_STOPPED";
const UNREAD_MONITOR_SUBSCRIBE_FAILED: &str = "CHAT_UNREAD_MONITOR_SUBSCRIBE_FAILED";
const UNREAD_MONITOR_CHANNEL_CLOSED: &str = "CHAT_UNREAD_MONITOR_CHANNEL_CLOSED";
const UNREAD_REFRESH_DISCARDED: &str = "CHAT_UNREAD_REFRESH_DISCARDED";
const UNREAD_ROUTE_CHANGED: &str = "CHAT_UNREAD_ROUTE_CHANGED";

#[derive(Debug)]
struct CounterShared {
    state: Mutex<CounterState>,
    badge: watch::Sender<UnreadBadge>,
    ceiling: u32,
}

#[derive(Debug, Default)]
struct CounterState {
    identity: Option<Identity>,
    route: Route,
    latest_ticket: u64,
}

/// Identifies one issued recount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RefreshTicket {
    id: u64,
    identity: Identity,
}

impl CounterShared {
    fn new(ceiling: u32) -> Self {
        let (badge, _) = watch::channel(UnreadBadge::default().with_ceiling(ceiling));
        Self {
            state: Mutex::new(CounterState::default()),
            badge,
            ceiling,
        }
    }

    fn publish(&self, count: u32) {
        self.badge
            .send_replace(UnreadBadge::new(count).with_ceiling(self.ceiling));
    }

    /// Issues a ticket that supersedes every earlier one. None when signed out.
    fn issue_ticket(&self) -> Option<RefreshTicket> {
        let mut state = self.state.lock().ok()?;
        state.latest_ticket += 1;
        Some(RefreshTicket {
            id: state.latest_ticket,
            identity: state.identity?,
        })
    }

    /// Applies a recount result if its ticket is still the latest for the current user.
    fn apply(&self, ticket: RefreshTicket, count: u32) -> bool {
        let current = match self.state.lock() {
            Ok(state) => {
                state.latest_ticket == ticket.id && state.identity == Some(ticket.identity)
            }
            Err(_) => false,
        };

        if !current {
            tracing::debug!(
                code = UNREAD_REFRESH_DISCARDED,
                ticket = ticket.id,
                "stale unread recount discarded"
            );
            return false;
        }

        self.publish(count);
        true
    }

    fn identity(&self) -> Option<Identity> {
        self.state.lock().ok().and_then(|state| state.identity)
    }
}

async fn refresh_count<B: ChatBackend>(backend: &B, shared: &CounterShared) -> u32 {
    let Some(ticket) = shared.issue_ticket() else {
        shared.publish(0);
        return 0;
    };

    let count = fetch_unread_count(backend, &ticket.identity).await;
    shared.apply(ticket, count);
    shared.badge.borrow().count()
}

/// Keeps the global unread badge current for the signed-in user.
pub struct UnreadCounter<B: ChatBackend> {
    backend: Arc<B>,
    shared: Arc<CounterShared>,
    monitor: Option<GlobalInsertMonitor>,
}

impl<B: ChatBackend + 'static> UnreadCounter<B> {
    pub fn new(backend: Arc<B>, badge_ceiling: u32) -> Self {
        Self {
            backend,
            shared: Arc::new(CounterShared::new(badge_ceiling)),
            monitor: None,
        }
    }

    pub fn badge(&self) -> UnreadBadge {
        *self.shared.badge.borrow()
    }

    pub fn subscribe_badge(&self) -> watch::Receiver<UnreadBadge> {
        self.shared.badge.subscribe()
    }

    /// Whether a global insert subscription is currently held.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_listening(&self) -> bool {
        self.monitor.is_some()
    }

    /// Switches to the given auth state. A new user restarts the insert
    /// subscription and recounts; signing out zeroes the badge and holds nothing.
    pub async fn set_auth(&mut self, auth: &AuthContext) {
        let identity = auth.identity();
        if identity == self.shared.identity() && (identity.is_none() || self.monitor.is_some()) {
            return;
        }

        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }

        if let Ok(mut state) = self.shared.state.lock() {
            state.identity = identity;
            state.latest_ticket += 1;
        }

        let Some(identity) = identity else {
            self.shared.publish(0);
            return;
        };

        self.monitor = GlobalInsertMonitor::start(
            Arc::clone(&self.backend),
            identity,
            Arc::downgrade(&self.shared),
        );
        self.refresh().await;
    }

    /// Recounts when the visible route differs from the last one seen.
    pub async fn route_changed(&mut self, route: Route) {
        let changed = match self.shared.state.lock() {
            Ok(mut state) if state.route != route => {
                tracing::debug!(
                    code = UNREAD_ROUTE_CHANGED,
                    route = route.as_str(),
                    "route changed; recounting unread"
                );
                state.route = route;
                true
            }
            _ => false,
        };

        if changed {
            self.refresh().await;
        }
    }

    /// Recounts now and returns the badge count afterwards.
    pub async fn refresh(&self) -> u32 {
        refresh_count(self.backend.as_ref(), &self.shared).await
    }

    /// Stops listening for inserts and waits for the monitor to finish.
    pub async fn close(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
    }
}

impl<B: ChatBackend> std::fmt::Debug for UnreadCounter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnreadCounter")
            .field("badge", &*self.shared.badge.borrow())
            .field("listening", &self.monitor.is_some())
            .finish()
    }
}

/// Background task that recounts on every global insert.
#[derive(Debug)]
struct GlobalInsertMonitor {
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl GlobalInsertMonitor {
    fn start<B: ChatBackend + 'static>(
        backend: Arc<B>,
        identity: Identity,
        shared: Weak<CounterShared>,
    ) -> Option<Self> {
        let subscription = match backend.subscribe(SubscriptionScope::Global) {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::warn!(
                    code = UNREAD_MONITOR_SUBSCRIBE_FAILED,
                    error = %error,
                    "global insert subscription failed; badge updates on navigation only"
                );
                return None;
            }
        };

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut subscription = subscription;
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            tracing::debug!(
                                code = UNREAD_MONITOR_STOPPED,
                                "unread monitor stopped"
                            );
                            return;
                        }
                    }
                    event = subscription.next_event() => {
                        if event.is_none() {
                            tracing::warn!(
                                code = UNREAD_MONITOR_CHANNEL_CLOSED,
                                "global insert channel closed; badge updates on navigation only"
                            );
                            return;
                        }
                        let Some(shared) = shared.upgrade() else {
                            return;
                        };
                        refresh_count(backend.as_ref(), &shared).await;
                    }
                }
            }
        });

        tracing::info!(
            code = UNREAD_MONITOR_STARTED,
            user_id = %identity.user_id(),
            "unread monitor started"
        );

        Some(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for GlobalInsertMonitor {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        backend::InMemoryBackend,
        domain::identity::UserId,
        test_support::Village,
        usecases::read_state::ReadStateStore,
    };

    async fn wait_for_count(counter: &UnreadCounter<InMemoryBackend>, expected: u32) {
        let mut badge = counter.subscribe_badge();
        let reached = matches!(
            tokio::time::timeout(
                Duration::from_secs(2),
                badge.wait_for(|badge| badge.count() == expected),
            )
            .await,
            Ok(Ok(_))
        );
        assert!(
            reached,
            "badge never reached {expected}, is {:?}",
            counter.badge()
        );
    }

    #[tokio::test]
    async fn signed_out_counter_is_zero_without_subscription() {
        let village = Village::new().await;
        village.post_as_bob("unseen").await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);

        counter.set_auth(&AuthContext::SignedOut).await;

        assert_eq!(counter.badge().count(), 0);
        assert!(!counter.is_listening());
        assert_eq!(village.backend.realtime().active_subscriptions(), 0);
        assert_eq!(village.backend.unread_count_calls(), 0);
    }

    #[tokio::test]
    async fn sign_in_recounts_and_subscribes_globally() {
        let village = Village::new().await;
        village.post_as_bob("one").await;
        village.post_as_bob("two").await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);

        counter.set_auth(&village.alice).await;

        assert_eq!(counter.badge().count(), 2);
        assert_eq!(counter.badge().label().as_deref(), Some("2"));
        assert!(counter.is_listening());
        assert_eq!(village.backend.realtime().active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn global_insert_triggers_recount() {
        let village = Village::new().await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);
        counter.set_auth(&village.alice).await;
        assert_eq!(counter.badge().count(), 0);
        let calls_before = village.backend.unread_count_calls();

        village.post_as_bob("ping").await;

        wait_for_count(&counter, 1).await;
        assert!(village.backend.unread_count_calls() > calls_before);
    }

    #[tokio::test]
    async fn route_change_reflects_mark_read() {
        let village = Village::new().await;
        village.post_as_bob("ping").await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);
        counter.set_auth(&village.alice).await;
        assert_eq!(counter.badge().count(), 1);

        village
            .backend
            .mark_conversation_as_read(&village.alice_identity(), village.conversation_id)
            .await
            .expect("mark read");
        counter
            .route_changed(Route::new(format!("/messages/{}", village.conversation_id)))
            .await;

        assert_eq!(counter.badge().count(), 0);
        assert_eq!(counter.badge().label(), None);
    }

    #[tokio::test]
    async fn same_route_does_not_recount() {
        let village = Village::new().await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);
        counter.set_auth(&village.alice).await;
        counter.route_changed(Route::new("/messages")).await;
        let calls = village.backend.unread_count_calls();

        counter.route_changed(Route::new("/messages")).await;

        assert_eq!(village.backend.unread_count_calls(), calls);
    }

    #[tokio::test]
    async fn sign_out_releases_subscription_and_zeroes_badge() {
        let village = Village::new().await;
        village.post_as_bob("ping").await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);
        counter.set_auth(&village.alice).await;
        assert_eq!(counter.badge().count(), 1);

        counter.set_auth(&AuthContext::SignedOut).await;

        assert_eq!(counter.badge().count(), 0);
        assert!(!counter.is_listening());
        assert_eq!(village.backend.realtime().active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn switching_user_recounts_for_new_user() {
        let village = Village::new().await;
        village.post_as_bob("for alice").await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);
        counter.set_auth(&village.alice).await;
        assert_eq!(counter.badge().count(), 1);

        counter.set_auth(&village.bob).await;

        assert_eq!(counter.badge().count(), 0);
        assert_eq!(village.backend.realtime().active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn failed_recount_degrades_to_zero() {
        let village = Village::new().await;
        village.post_as_bob("ping").await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);
        village.backend.fail_next_reads(1);

        counter.set_auth(&village.alice).await;

        assert_eq!(counter.badge().count(), 0);
        assert_eq!(counter.refresh().await, 1);
    }

    #[tokio::test]
    async fn badge_uses_configured_ceiling() {
        let village = Village::new().await;
        for n in 0..12 {
            village.post_as_bob(&format!("msg {n}")).await;
        }
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 9);

        counter.set_auth(&village.alice).await;

        assert_eq!(counter.badge().count(), 12);
        assert_eq!(counter.badge().label().as_deref(), Some("9+"));
    }

    #[tokio::test]
    async fn close_releases_subscription() {
        let village = Village::new().await;
        let mut counter = UnreadCounter::new(Arc::clone(&village.backend), 99);
        counter.set_auth(&village.alice).await;

        counter.close().await;

        assert_eq!(village.backend.realtime().active_subscriptions(), 0);
    }

    #[test]
    fn overtaken_recount_is_discarded() {
        let shared = CounterShared::new(99);
        if let Ok(mut state) = shared.state.lock() {
            state.identity = Some(Identity::new(UserId::new()));
        }

        let older = shared.issue_ticket().expect("signed in");
        let newer = shared.issue_ticket().expect("signed in");

        assert!(shared.apply(newer, 3));
        assert!(!shared.apply(older, 7));
        assert_eq!(shared.badge.borrow().count(), 3);
    }

    #[test]
    fn recount_for_previous_user_is_discarded() {
        let shared = CounterShared::new(99);
        if let Ok(mut state) = shared.state.lock() {
            state.identity = Some(Identity::new(UserId::new()));
        }
        let ticket = shared.issue_ticket().expect("signed in");

        if let Ok(mut state) = shared.state.lock() {
            state.identity = Some(Identity::new(UserId::new()));
        }

        assert!(!shared.apply(ticket, 5));
        assert_eq!(shared.badge.borrow().count(), 0);
    }

    #[test]
    fn signed_out_issues_no_ticket() {
        let shared = CounterShared::new(99);

        assert_eq!(shared.issue_ticket(), None);
    }
}
