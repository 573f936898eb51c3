//! # Data Contact
//!
//! `data-contact` defines [`Contact`], an immutable snapshot of one directory
//! entry, together with its lazily loaded avatar.
//!
//! Identity fields are fixed at construction. The avatar pair (raw bytes and
//! the decoded image) is the only mutable state and is guarded by a lock
//! private to each contact, so decoding one avatar never blocks lookups of
//! other contacts.

use std::fmt::{self, Debug, Display};
use std::sync::{Arc, Mutex, MutexGuard};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use data_error::Result;

mod avatar;

use avatar::AvatarSlot;

/// Identifies the directory entry a [`Contact`] was resolved from.
///
/// The lookup key lets the directory find the still-correct entry even if
/// `directory_id` gets recycled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactTarget {
    pub directory_id: i64,
    pub lookup_key: String,
}

impl Display for ContactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.directory_id, self.lookup_key)
    }
}

/// A snapshot of a directory entry.
///
/// Only a directory client creates contacts. Every field except the avatar
/// is set once here and never changes.
#[derive(Serialize, Deserialize)]
pub struct Contact {
    directory_id: i64,
    lookup_key: String,
    display_name: String,
    phone_number: String,
    content_hash: String,
    registered: bool,
    #[serde(skip)]
    avatar: Mutex<AvatarSlot>,
}

impl Contact {
    pub fn new(
        directory_id: i64,
        lookup_key: impl Into<String>,
        display_name: impl Into<String>,
        phone_number: impl Into<String>,
        content_hash: impl Into<String>,
        registered: bool,
    ) -> Self {
        Self {
            directory_id,
            lookup_key: lookup_key.into(),
            display_name: display_name.into(),
            phone_number: phone_number.into(),
            content_hash: content_hash.into(),
            registered,
            avatar: Mutex::new(AvatarSlot::default()),
        }
    }

    pub fn directory_id(&self) -> i64 {
        self.directory_id
    }

    pub fn lookup_key(&self) -> &str {
        &self.lookup_key
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Returns the target used to watch the underlying entry for changes.
    pub fn target(&self) -> ContactTarget {
        ContactTarget {
            directory_id: self.directory_id,
            lookup_key: self.lookup_key.clone(),
        }
    }

    /// Returns the decoded avatar, or `fallback` when there is none.
    ///
    /// Bytes are fetched with `load` only when nothing is cached yet. The
    /// outcome is remembered, including "no avatar" and "malformed bytes",
    /// so later calls neither fetch nor decode again. A fetch error is
    /// logged and not remembered.
    ///
    /// The per-contact lock is held for the whole fetch and decode, so two
    /// concurrent callers never do the work twice.
    pub fn avatar_with<F>(
        &self,
        load: F,
        fallback: &Arc<DynamicImage>,
    ) -> Arc<DynamicImage>
    where
        F: FnOnce(&Contact) -> Result<Option<Vec<u8>>>,
    {
        let mut slot = self.lock_avatar();

        if let AvatarSlot::Unloaded = *slot {
            match load(self) {
                Ok(bytes) => *slot = AvatarSlot::from_loaded(bytes),
                Err(err) => {
                    log::error!(
                        "contact/{}: cannot retrieve avatar: {}",
                        self.target(),
                        err
                    );
                    return fallback.clone();
                }
            }
        }

        slot.image()
            .unwrap_or_else(|| fallback.clone())
    }

    /// The raw avatar bytes, if they were loaded and are non-empty.
    pub fn avatar_bytes(&self) -> Option<Arc<[u8]>> {
        self.lock_avatar().bytes()
    }

    /// Whether the avatar has been fetched since construction or the last
    /// [`Contact::release_avatar`].
    pub fn is_avatar_loaded(&self) -> bool {
        !matches!(*self.lock_avatar(), AvatarSlot::Unloaded)
    }

    /// Frees the avatar bytes and image. The next avatar request fetches
    /// them again; all other fields are untouched.
    pub fn release_avatar(&self) {
        let mut slot = self.lock_avatar();
        if !matches!(*slot, AvatarSlot::Unloaded) {
            log::debug!("contact/{}: releasing avatar", self.target());
        }
        *slot = AvatarSlot::Unloaded;
    }

    // The slot is always left in a valid state, so a poisoned lock is
    // still usable.
    fn lock_avatar(&self) -> MutexGuard<'_, AvatarSlot> {
        self.avatar
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.directory_id == other.directory_id
            && self.lookup_key == other.lookup_key
            && self.display_name == other.display_name
            && self.phone_number == other.phone_number
            && self.content_hash == other.content_hash
            && self.registered == other.registered
    }
}

impl Eq for Contact {}

impl Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("directory_id", &self.directory_id)
            .field("lookup_key", &self.lookup_key)
            .field("display_name", &self.display_name)
            .field("phone_number", &self.phone_number)
            .field("content_hash", &self.content_hash)
            .field("registered", &self.registered)
            .finish()
    }
}
