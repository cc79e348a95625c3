//! Session controller - reactive session state bound to one capability.
//!
//! The controller owns the subscribe/unsubscribe lifecycle against the
//! capability's change stream and publishes its state through a
//! `tokio::sync::watch` channel.
//!
//! Two asynchronous sources write to the state: the initial `get_session`
//! call and the change listener. Both check the binding's [`ActiveScope`]
//! inside the watch lock before mutating, and teardown deactivates the scope
//! under that same lock, so nothing lands after teardown returns. Once a
//! change event has been applied, the initial load may only clear the
//! loading flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;

use super::Capability;
use crate::domain::auth::{AuthChangeEvent, Session, User};
use crate::ports::{SessionListener, Subscription};

/// Lifecycle phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Observable session state.
///
/// `user` is always the user embedded in `session`; both are replaced
/// together.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    session: Option<Session>,
    user: Option<User>,
    is_loading: bool,
    phase: SessionPhase,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session: None,
            user: None,
            is_loading: true,
            phase: SessionPhase::Uninitialized,
        }
    }
}

impl SessionState {
    fn loading() -> Self {
        Self {
            phase: SessionPhase::Loading,
            ..Self::default()
        }
    }

    fn unauthenticated() -> Self {
        Self {
            session: None,
            user: None,
            is_loading: false,
            phase: SessionPhase::Unauthenticated,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    fn set_session(&mut self, session: Option<Session>) {
        self.user = session.as_ref().map(|s| s.user().clone());
        self.session = session;
        self.phase = self.derived_phase();
    }

    fn finish_loading(&mut self) {
        self.is_loading = false;
        self.phase = self.derived_phase();
    }

    fn derived_phase(&self) -> SessionPhase {
        if self.is_loading {
            SessionPhase::Loading
        } else if self.user.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        }
    }
}

/// Liveness token of one binding.
///
/// Only read or written while holding the watch channel's lock.
#[derive(Debug)]
struct ActiveScope {
    active: AtomicBool,
    event_applied: AtomicBool,
}

impl ActiveScope {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            event_applied: AtomicBool::new(false),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn mark_event_applied(&self) {
        self.event_applied.store(true, Ordering::Release);
    }

    fn event_applied(&self) -> bool {
        self.event_applied.load(Ordering::Acquire)
    }
}

type StateSender = watch::Sender<SessionState>;

/// Resources held for the currently bound capability.
struct Binding {
    capability: Capability,
    scope: Option<Arc<ActiveScope>>,
    subscription: Option<Subscription>,
}

impl Binding {
    fn detached() -> Self {
        Self {
            capability: Capability::Unconfigured,
            scope: None,
            subscription: None,
        }
    }

    fn attach(state: &Arc<StateSender>, capability: Capability) -> Self {
        let Some(backend) = capability.backend().cloned() else {
            tracing::debug!("No auth backend; session controller starts unauthenticated");
            state.send_replace(SessionState::unauthenticated());
            return Self {
                capability,
                scope: None,
                subscription: None,
            };
        };

        let scope = Arc::new(ActiveScope::new());
        state.send_replace(SessionState::loading());

        let subscription = backend.on_auth_state_change(change_listener(state, &scope));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(load_initial(
                    Arc::downgrade(state),
                    Arc::clone(&scope),
                    capability.clone(),
                ));
            }
            Err(_) => {
                tracing::error!("Session controller started outside a tokio runtime");
                state.send_if_modified(|current| {
                    current.finish_loading();
                    true
                });
            }
        }

        Self {
            capability,
            scope: Some(scope),
            subscription: Some(subscription),
        }
    }

    fn is_live(&self) -> bool {
        self.scope.as_ref().map_or(true, |scope| scope.is_active())
    }

    fn release(&mut self, state: &StateSender) {
        if let Some(scope) = &self.scope {
            state.send_if_modified(|_| {
                scope.deactivate();
                false
            });
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

fn change_listener(state: &Arc<StateSender>, scope: &Arc<ActiveScope>) -> SessionListener {
    let state = Arc::downgrade(state);
    let scope = Arc::clone(scope);
    Arc::new(move |event: AuthChangeEvent| {
        let Some(state) = state.upgrade() else {
            return;
        };
        let kind = event.kind;
        let applied = state.send_if_modified(|current| {
            if !scope.is_active() {
                return false;
            }
            scope.mark_event_applied();
            current.set_session(event.session);
            true
        });
        if applied {
            tracing::debug!(?kind, "Applied session change");
        }
    })
}

async fn load_initial(state: Weak<StateSender>, scope: Arc<ActiveScope>, capability: Capability) {
    let session = match capability.get_session().await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load initial session");
            None
        }
    };

    let Some(state) = state.upgrade() else {
        return;
    };
    let applied = state.send_if_modified(|current| {
        if !scope.is_active() {
            return false;
        }
        if !scope.event_applied() {
            current.set_session(session);
        }
        current.finish_loading();
        true
    });
    if !applied {
        tracing::debug!("Discarded initial session load after teardown");
    }
}

/// Process-scoped session state bound to a [`Capability`].
///
/// Dropping the controller releases its subscription.
pub struct SessionController {
    state: Arc<StateSender>,
    binding: Mutex<Binding>,
}

impl SessionController {
    /// Bind to `capability` and start loading.
    ///
    /// With an unconfigured capability the controller is `Unauthenticated`
    /// with `is_loading == false` when this returns. A configured one needs a
    /// tokio runtime for the initial load.
    pub fn start(capability: Capability) -> Self {
        let (sender, _) = watch::channel(SessionState::default());
        let controller = Self {
            state: Arc::new(sender),
            binding: Mutex::new(Binding::detached()),
        };
        controller.bind(capability);
        controller
    }

    /// Re-bind to another capability, releasing the current binding first.
    ///
    /// Re-binding to the backend already bound is a no-op.
    pub fn rebind(&self, capability: Capability) {
        {
            let binding = self.lock_binding();
            if binding.capability.same_backend(&capability) && binding.is_live() {
                return;
            }
        }
        self.bind(capability);
    }

    /// Release the subscription and discard any pending completion.
    pub fn shutdown(&self) {
        self.lock_binding().release(&self.state);
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The bound capability.
    pub fn capability(&self) -> Capability {
        self.lock_binding().capability.clone()
    }

    /// Wait until the initial load finished and return the state.
    pub async fn loaded(&self) -> SessionState {
        let mut receiver = self.watch();
        let state = match receiver.wait_for(|state| !state.is_loading()).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        };
        state
    }

    fn bind(&self, capability: Capability) {
        let mut binding = self.lock_binding();
        binding.release(&self.state);
        *binding = Binding::attach(&self.state, capability);
    }

    fn lock_binding(&self) -> MutexGuard<'_, Binding> {
        self.binding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::InMemoryAuthBackend;
    use crate::domain::auth::{AuthError, Credentials};
    use crate::domain::foundation::UserId;
    use crate::ports::AuthCapability;
    use std::time::Duration;

    fn user(id: &str) -> User {
        User::new(UserId::new(id).unwrap(), Some(format!("{}@example.com", id)))
    }

    fn session(token: &str, user_id: &str) -> Session {
        Session::new(token, user(user_id))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    fn bind(backend: &Arc<InMemoryAuthBackend>) -> SessionController {
        let capability: Arc<dyn AuthCapability> = backend.clone();
        SessionController::start(Capability::from(capability))
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Start
    // ════════════════════════════════════════════════════════════════════════════

    #[test]
    fn unconfigured_is_unauthenticated_immediately() {
        let controller = SessionController::start(Capability::Unconfigured);

        let state = controller.snapshot();
        assert!(!state.is_loading());
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
        assert!(state.session().is_none());
        assert!(state.user().is_none());
    }

    #[test]
    fn default_state_is_uninitialized_and_loading() {
        let state = SessionState::default();
        assert_eq!(state.phase(), SessionPhase::Uninitialized);
        assert!(state.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn configured_starts_loading_then_authenticates() {
        let backend = Arc::new(
            InMemoryAuthBackend::new()
                .with_session(session("t1", "alice"))
                .with_get_session_delay(Duration::from_millis(50)),
        );
        let controller = bind(&backend);

        assert_eq!(controller.snapshot().phase(), SessionPhase::Loading);

        let state = controller.loaded().await;
        assert_eq!(state.phase(), SessionPhase::Authenticated);
        assert_eq!(state.session().map(Session::access_token), Some("t1"));
        assert_eq!(state.user().map(|u| u.id.as_str()), Some("alice"));
        assert_eq!(backend.get_session_calls(), 1);
        assert_eq!(backend.subscriber_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loaded_resolves_for_waiters_before_and_after_load() {
        let backend = Arc::new(
            InMemoryAuthBackend::new()
                .with_session(session("t1", "alice"))
                .with_get_session_delay(Duration::from_millis(50)),
        );
        let controller = bind(&backend);

        let (early, also_early) = tokio::join!(controller.loaded(), controller.loaded());
        let late = controller.loaded().await;

        assert_eq!(early, also_early);
        assert_eq!(early, late);
        assert_eq!(late.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_without_session_is_unauthenticated() {
        let backend = Arc::new(InMemoryAuthBackend::new());
        let controller = bind(&backend);

        let state = controller.loaded().await;
        assert_eq!(state.phase(), SessionPhase::Unauthenticated);
        assert!(!state.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_load_counts_as_no_session() {
        let backend = Arc::new(
            InMemoryAuthBackend::new()
                .with_session(session("t1", "alice"))
                .with_error(AuthError::transport("connection refused")),
        );
        let controller = bind(&backend);

        let state = controller.loaded().await;
        assert!(!state.is_loading());
        assert!(state.session().is_none());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Change Events
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn sign_in_event_updates_state() {
        let backend =
            Arc::new(InMemoryAuthBackend::new().with_test_user("bob@example.com", "secret1"));
        let controller = bind(&backend);
        controller.loaded().await;

        let result = backend
            .sign_in(&Credentials::new("bob@example.com", "secret1"))
            .await
            .unwrap();
        settle().await;

        let state = controller.snapshot();
        assert_eq!(state.session(), result.session.as_ref());
        assert_eq!(state.user(), result.user.as_ref());
        assert_eq!(state.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn last_event_wins_over_later_initial_load() {
        let backend = Arc::new(
            InMemoryAuthBackend::new()
                .with_session(session("stale", "alice"))
                .with_get_session_delay(Duration::from_millis(100)),
        );
        let controller = bind(&backend);

        // get_session has read "stale" and is still in flight
        settle().await;
        backend.invalidate_session();
        settle().await;

        let during = controller.snapshot();
        assert!(during.is_loading());
        assert!(during.session().is_none());

        let after = controller.loaded().await;
        assert!(!after.is_loading());
        assert!(after.session().is_none());
        assert_eq!(after.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_applied_in_order() {
        let backend = Arc::new(InMemoryAuthBackend::new());
        let controller = bind(&backend);
        controller.loaded().await;

        for i in 0..10 {
            backend.push_change(AuthChangeEvent::token_refreshed(session(
                &format!("t{}", i),
                "alice",
            )));
        }
        backend.push_change(AuthChangeEvent::signed_in(session("final", "carol")));
        settle().await;

        let state = controller.snapshot();
        assert_eq!(state.session().map(Session::access_token), Some("final"));
        assert_eq!(state.user().map(|u| u.id.as_str()), Some("carol"));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_receiver_observes_changes() {
        let backend = Arc::new(InMemoryAuthBackend::new());
        let controller = bind(&backend);
        controller.loaded().await;
        let mut changes = controller.watch();

        backend.push_change(AuthChangeEvent::signed_in(session("t1", "alice")));
        changes.changed().await.unwrap();

        assert!(changes.borrow().is_authenticated());
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Teardown
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_event_delivery() {
        let backend = Arc::new(InMemoryAuthBackend::new());
        let controller = bind(&backend);
        controller.loaded().await;

        controller.shutdown();
        backend.push_change(AuthChangeEvent::signed_in(session("t1", "alice")));
        settle().await;

        assert!(controller.snapshot().session().is_none());
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_pending_initial_load() {
        let backend = Arc::new(
            InMemoryAuthBackend::new()
                .with_session(session("t1", "alice"))
                .with_get_session_delay(Duration::from_millis(100)),
        );
        let controller = bind(&backend);
        settle().await;

        controller.shutdown();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let state = controller.snapshot();
        assert!(state.session().is_none());
        assert!(state.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_releases_subscription() {
        let backend = Arc::new(InMemoryAuthBackend::new());
        let controller = bind(&backend);
        assert_eq!(backend.subscriber_count(), 1);

        drop(controller);

        assert_eq!(backend.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rebind_moves_subscription_to_new_backend() {
        let first = Arc::new(InMemoryAuthBackend::new());
        let second = Arc::new(InMemoryAuthBackend::new().with_session(session("t2", "bob")));
        let controller = bind(&first);
        controller.loaded().await;

        let capability: Arc<dyn AuthCapability> = second.clone();
        controller.rebind(Capability::from(capability));
        let state = controller.loaded().await;

        assert_eq!(first.subscriber_count(), 0);
        assert_eq!(second.subscriber_count(), 1);
        assert_eq!(state.session().map(Session::access_token), Some("t2"));

        first.push_change(AuthChangeEvent::signed_in(session("t1", "alice")));
        settle().await;
        assert_eq!(
            controller.snapshot().session().map(Session::access_token),
            Some("t2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rebind_to_same_backend_keeps_subscription() {
        let backend = Arc::new(InMemoryAuthBackend::new());
        let controller = bind(&backend);
        controller.loaded().await;

        controller.rebind(controller.capability());

        assert_eq!(backend.subscriber_count(), 1);
        assert_eq!(backend.get_session_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rebind_to_unconfigured_clears_state() {
        let backend = Arc::new(InMemoryAuthBackend::new().with_session(session("t1", "alice")));
        let controller = bind(&backend);
        controller.loaded().await;

        controller.rebind(Capability::Unconfigured);

        let state = controller.snapshot();
        assert!(state.session().is_none());
        assert!(!state.is_loading());
        assert_eq!(backend.subscriber_count(), 0);
    }
}
