use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use data_contact::ContactTarget;

/// Receives change events. One listener serves a whole cache; the user id
/// tells it which entry went stale.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, user_id: &str);
}

/// Delivers "this entry changed" events for subscribed targets.
///
/// Delivery may happen on any thread and at least once per change, so
/// listeners must tolerate duplicates. Implementations must not hold their
/// own locks while invoking a listener: the listener is allowed to
/// subscribe and unsubscribe from within the callback.
pub trait ChangeNotifier: Send + Sync {
    fn subscribe(
        &self,
        target: &ContactTarget,
        user_id: &str,
        listener: Weak<dyn ChangeListener>,
    ) -> SubscriptionHandle;

    /// Removing an unknown or already removed handle is a no-op.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Opaque token returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered interest in one target.
#[derive(Clone)]
pub struct Subscription {
    target: ContactTarget,
    user_id: String,
    listener: Weak<dyn ChangeListener>,
}

impl Subscription {
    pub fn target(&self) -> &ContactTarget {
        &self.target
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Invokes the listener. Returns `false` if it has been dropped.
    pub fn notify(&self) -> bool {
        match self.listener.upgrade() {
            Some(listener) => {
                listener.on_change(&self.user_id);
                true
            }
            None => false,
        }
    }
}

/// Handle allocation and bookkeeping shared by notifier implementations.
#[derive(Default)]
pub struct Subscriptions {
    next: AtomicU64,
    table: RwLock<HashMap<SubscriptionHandle, Subscription>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        target: &ContactTarget,
        user_id: &str,
        listener: Weak<dyn ChangeListener>,
    ) -> SubscriptionHandle {
        let handle =
            SubscriptionHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.write().insert(
            handle,
            Subscription {
                target: target.clone(),
                user_id: user_id.to_owned(),
                listener,
            },
        );
        handle
    }

    /// Returns `false` if the handle was not registered.
    pub fn remove(&self, handle: SubscriptionHandle) -> bool {
        self.write().remove(&handle).is_some()
    }

    pub fn contains(&self, handle: SubscriptionHandle) -> bool {
        self.read().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Notifies every subscription matching `predicate` and returns how
    /// many listeners were reached.
    ///
    /// Matches are collected first and the table lock is released before
    /// any listener runs.
    pub fn dispatch<P>(&self, predicate: P) -> usize
    where
        P: Fn(&Subscription) -> bool,
    {
        let matching: Vec<Subscription> = self
            .read()
            .values()
            .filter(|subscription| predicate(subscription))
            .cloned()
            .collect();

        matching
            .iter()
            .filter(|subscription| subscription.notify())
            .count()
    }

    fn read(
        &self,
    ) -> RwLockReadGuard<'_, HashMap<SubscriptionHandle, Subscription>> {
        self.table
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<SubscriptionHandle, Subscription>> {
        self.table
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An in-process [`ChangeNotifier`]. Hosts forward the change signals they
/// receive through [`LocalNotifier::notify`].
pub struct LocalNotifier {
    /// Label for logging
    label: String,
    subscriptions: Subscriptions,
}

impl LocalNotifier {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            subscriptions: Subscriptions::new(),
        }
    }

    /// Fires every listener subscribed to `target`.
    pub fn notify(&self, target: &ContactTarget) -> usize {
        let reached = self
            .subscriptions
            .dispatch(|subscription| subscription.target() == target);
        log::debug!(
            "notifier/{}: change of {} reached {} listeners",
            self.label,
            target,
            reached
        );
        reached
    }

    /// Fires every listener subscribed under `user_id`.
    pub fn notify_user(&self, user_id: &str) -> usize {
        let reached = self
            .subscriptions
            .dispatch(|subscription| subscription.user_id() == user_id);
        log::debug!(
            "notifier/{}: change of user {} reached {} listeners",
            self.label,
            user_id,
            reached
        );
        reached
    }

    pub fn is_subscribed(&self, handle: SubscriptionHandle) -> bool {
        self.subscriptions.contains(handle)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl ChangeNotifier for LocalNotifier {
    fn subscribe(
        &self,
        target: &ContactTarget,
        user_id: &str,
        listener: Weak<dyn ChangeListener>,
    ) -> SubscriptionHandle {
        let handle = self
            .subscriptions
            .insert(target, user_id, listener);
        log::debug!(
            "notifier/{}: {} subscribed to {} for user {}",
            self.label,
            handle,
            target,
            user_id
        );
        handle
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.subscriptions.remove(handle) {
            log::debug!("notifier/{}: {} unsubscribed", self.label, handle);
        }
    }
}
