use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use image::DynamicImage;

use data_contact::{Contact, ContactTarget};
use data_error::Result;

use crate::directory::DirectoryClient;
use crate::notifier::{ChangeListener, ChangeNotifier, SubscriptionHandle};

/// A subscription together with the target it was registered for.
struct Watch {
    handle: SubscriptionHandle,
    target: ContactTarget,
}

/// The per-key critical section.
///
/// When both are present the watch target equals the contact's target.
/// A watch without a contact is left over from a refill that failed and is
/// reused or rotated by the next fill.
#[derive(Default)]
struct Entry {
    contact: Option<Arc<Contact>>,
    watch: Option<Watch>,
}

impl Entry {
    fn is_vacant(&self) -> bool {
        self.contact.is_none() && self.watch.is_none()
    }
}

type Slot = Arc<Mutex<Entry>>;

/// An in-memory cache of contacts keyed by user id.
///
/// Misses are filled from a [`DirectoryClient`] and every cached entry is
/// watched through a [`ChangeNotifier`]; a change event evicts the entry
/// and eagerly fills it again. Entries live until invalidated: there is
/// no size limit and no expiry.
///
/// Operations on the same user id are serialized, operations on different
/// user ids run in parallel. Avatars are loaded lazily under a lock owned
/// by each contact, so a slow decode never blocks `get` or `invalidate`.
///
/// Construct one per session and share it; clones are cheap handles to the
/// same cache. Dropping the last handle unsubscribes everything.
#[derive(Clone)]
pub struct ContactCache {
    inner: Arc<Inner>,
}

struct Inner {
    /// Label for logging
    label: String,
    directory: Arc<dyn DirectoryClient>,
    notifier: Arc<dyn ChangeNotifier>,
    /// Slots are created on first use and only removed while nobody else
    /// holds them, so each user id maps to a single critical section.
    slots: Mutex<HashMap<String, Slot>>,
    /// Registered with the notifier as the cache-wide listener.
    this: Weak<Inner>,
}

impl ContactCache {
    /// Creates an empty cache.
    ///
    /// # Arguments
    /// * `label` - Identifier used in logs
    /// * `directory` - Source the cache is filled from
    /// * `notifier` - Delivers change events for cached entries
    pub fn new(
        label: impl Into<String>,
        directory: Arc<dyn DirectoryClient>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        let label = label.into();
        log::debug!("cache/{}: initialized", label);

        let inner = Arc::new_cyclic(|this| Inner {
            label,
            directory,
            notifier,
            slots: Mutex::new(HashMap::new()),
            this: this.clone(),
        });
        Self { inner }
    }

    /// Returns the contact for `user_id`, querying the directory on a miss.
    ///
    /// `Ok(None)` means the directory has no such entry; nothing is cached
    /// in that case. Directory faults are returned as errors and leave the
    /// cache untouched. Concurrent misses on the same user id query the
    /// directory once and all observe the same contact.
    pub fn get(&self, user_id: &str) -> Result<Option<Arc<Contact>>> {
        self.inner.get(user_id)
    }

    /// Evicts and returns the cached contact, dropping its subscription.
    /// Invalidating an absent user id does nothing.
    pub fn invalidate(&self, user_id: &str) -> Option<Arc<Contact>> {
        self.inner.invalidate(user_id)
    }

    /// Evicts every entry and drops every subscription.
    pub fn invalidate_all(&self) {
        let user_ids: Vec<String> = self.inner.slots().keys().cloned().collect();
        for user_id in user_ids {
            self.inner.invalidate(&user_id);
        }
        log::debug!("cache/{}: invalidated all entries", self.inner.label);
    }

    /// Returns the decoded avatar of `contact`, or `fallback` when it has
    /// none or its bytes cannot be decoded. The fetch and decode happen at
    /// most once per contact until [`ContactCache::release`] is called.
    pub fn avatar(
        &self,
        contact: &Contact,
        fallback: &Arc<DynamicImage>,
    ) -> Arc<DynamicImage> {
        contact.avatar_with(
            |contact| self.inner.directory.load_avatar_bytes(contact),
            fallback,
        )
    }

    /// Frees the avatar held by `contact`.
    pub fn release(&self, contact: &Contact) {
        contact.release_avatar();
    }

    /// Looks up a phone number directly in the directory, bypassing the
    /// cache.
    pub fn phone_number_for(&self, user_id: &str) -> Result<Option<String>> {
        self.inner.directory.phone_number_for(user_id)
    }

    /// Lists every registered entry, ordered by display name.
    ///
    /// Names compare case-sensitively by their UTF-8 bytes, so `"Zoe"` sorts
    /// before `"adam"`; equal names are ordered by user id. The listing
    /// comes straight from the directory and does not fill the cache.
    pub fn registered(&self) -> Result<Vec<(String, Contact)>> {
        let mut contacts = self.inner.directory.registered()?;
        sort_by_display_name(&mut contacts);
        Ok(contacts)
    }

    /// Handles a change signalled for a raw directory entry reference:
    /// maps it back to a user id and evicts and refills that entry.
    pub fn refresh_raw(&self, raw_ref: &str) -> Result<()> {
        match self.inner.directory.user_id_for(raw_ref)? {
            Some(user_id) => self.inner.refresh(&user_id),
            None => log::debug!(
                "cache/{}: no user for raw reference {}",
                self.inner.label,
                raw_ref
            ),
        }
        Ok(())
    }

    /// Whether a contact is currently cached for `user_id`. Never queries
    /// the directory.
    pub fn is_cached(&self, user_id: &str) -> bool {
        let Some(slot) = self.inner.existing(user_id) else {
            return false;
        };
        let cached = lock(&slot).contact.is_some();
        self.inner.prune(user_id, slot);
        cached
    }

    /// Number of cached contacts.
    pub fn len(&self) -> usize {
        let slots: Vec<(String, Slot)> = self
            .inner
            .slots()
            .iter()
            .map(|(user_id, slot)| (user_id.clone(), slot.clone()))
            .collect();

        let mut cached = 0;
        for (user_id, slot) in slots {
            if lock(&slot).contact.is_some() {
                cached += 1;
            }
            self.inner.prune(&user_id, slot);
        }
        cached
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn get(&self, user_id: &str) -> Result<Option<Arc<Contact>>> {
        let slot = self.slot(user_id);
        let filled = {
            let mut entry = lock(&slot);
            if let Some(contact) = &entry.contact {
                log::debug!("cache/{}: hit for user {}", self.label, user_id);
                return Ok(Some(contact.clone()));
            }
            self.fill(user_id, &mut entry)
        };

        if !matches!(filled, Ok(Some(_))) {
            self.prune(user_id, slot);
        }
        filled
    }

    fn invalidate(&self, user_id: &str) -> Option<Arc<Contact>> {
        let slot = self.existing(user_id)?;
        let evicted = {
            let mut entry = lock(&slot);
            self.unwatch(&mut entry);
            entry.contact.take()
        };

        if evicted.is_some() {
            log::debug!("cache/{}: evicted user {}", self.label, user_id);
        }
        self.prune(user_id, slot);
        evicted
    }

    /// Evicts the entry and fills it again in one critical section.
    ///
    /// Events for entries that are no longer watched are ignored. A fault
    /// during the refill leaves the entry evicted; the next `get` retries.
    fn refresh(&self, user_id: &str) {
        let Some(slot) = self.existing(user_id) else {
            log::debug!(
                "cache/{}: ignoring change of unknown user {}",
                self.label,
                user_id
            );
            return;
        };

        {
            let mut entry = lock(&slot);
            if entry.is_vacant() {
                log::debug!(
                    "cache/{}: ignoring change of unwatched user {}",
                    self.label,
                    user_id
                );
            } else {
                entry.contact = None;
                log::debug!("cache/{}: refreshing user {}", self.label, user_id);
                if let Err(err) = self.fill(user_id, &mut entry) {
                    log::error!(
                        "cache/{}: failed to refresh user {}: {}",
                        self.label,
                        user_id,
                        err
                    );
                }
            }
        }

        // A failed refill keeps its watch, so only emptied slots go away
        self.prune(user_id, slot);
    }

    /// Queries the directory and stores the result. Must be called with
    /// the entry locked and empty.
    fn fill(
        &self,
        user_id: &str,
        entry: &mut Entry,
    ) -> Result<Option<Arc<Contact>>> {
        log::debug!("cache/{}: resolving user {}", self.label, user_id);

        let contact = match self.directory.resolve(user_id)? {
            Some(contact) => Arc::new(contact),
            None => {
                log::debug!("cache/{}: no entry for user {}", self.label, user_id);
                self.unwatch(entry);
                return Ok(None);
            }
        };

        self.watch(user_id, entry, contact.target());
        entry.contact = Some(contact.clone());
        Ok(Some(contact))
    }

    /// Makes sure the entry is watched for `target`, reusing the current
    /// subscription when it already points there.
    fn watch(&self, user_id: &str, entry: &mut Entry, target: ContactTarget) {
        match entry.watch.take() {
            Some(watch) if watch.target == target => {
                log::debug!(
                    "cache/{}: reusing {} for user {}",
                    self.label,
                    watch.handle,
                    user_id
                );
                entry.watch = Some(watch);
            }
            stale => {
                if let Some(stale) = stale {
                    log::debug!(
                        "cache/{}: rotating {} from {} to {}",
                        self.label,
                        stale.handle,
                        stale.target,
                        target
                    );
                    self.notifier.unsubscribe(stale.handle);
                }

                let listener: Weak<dyn ChangeListener> = self.this.clone();
                let handle = self
                    .notifier
                    .subscribe(&target, user_id, listener);
                entry.watch = Some(Watch { handle, target });
            }
        }
    }

    fn unwatch(&self, entry: &mut Entry) {
        if let Some(watch) = entry.watch.take() {
            self.notifier.unsubscribe(watch.handle);
        }
    }

    fn slot(&self, user_id: &str) -> Slot {
        self.slots()
            .entry(user_id.to_owned())
            .or_default()
            .clone()
    }

    fn existing(&self, user_id: &str) -> Option<Slot> {
        self.slots().get(user_id).cloned()
    }

    /// Drops the slot of a vacant entry.
    ///
    /// New references to a slot are only handed out under the map lock, so
    /// holding that lock and the only other reference means nobody can be
    /// waiting on the entry. Every path that clones a slot hands it back
    /// here, so whichever holder lets go last removes a vacant slot.
    fn prune(&self, user_id: &str, slot: Slot) {
        let mut slots = self.slots();
        if Arc::strong_count(&slot) == 2 && lock(&slot).is_vacant() {
            slots.remove(user_id);
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        lock(&self.slots)
    }
}

impl ChangeListener for Inner {
    fn on_change(&self, user_id: &str) {
        self.refresh(user_id);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slots = self
            .slots
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for slot in slots.values() {
            if let Some(watch) = lock(slot).watch.take() {
                self.notifier.unsubscribe(watch.handle);
            }
        }
        log::debug!("cache/{}: dropped", self.label);
    }
}

fn sort_by_display_name(contacts: &mut [(String, Contact)]) {
    contacts.sort_by(|(a_id, a), (b_id, b)| {
        a.display_name()
            .cmp(b.display_name())
            .then_with(|| a_id.cmp(b_id))
    });
}

// Entries are only written after the directory call returns, so a lock
// poisoned by a panicking directory still guards consistent state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
