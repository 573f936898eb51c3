//! # contactlib
//!
//! An in-memory cache of contact records resolved from a directory, kept
//! consistent by change notifications and loading avatars lazily.
//!
//! The pieces live in their own crates and are re-exported here:
//!
//! - `data-error`: [`ContactError`] and the [`Result`] alias
//! - `data-contact`: the [`Contact`] record and its lazy avatar
//! - `contact-cache`: [`ContactCache`] and the [`DirectoryClient`] and
//!   [`ChangeNotifier`] seams it is built on
//! - `fs-directory`: a folder-backed directory and, with the `watch`
//!   feature, a filesystem-driven notifier
//!
//! A cache is meant to be built once per session and passed to whoever
//! needs it:
//!
//! ```no_run
//! # fn main() -> contactlib::Result<()> {
//! let (cache, _notifier) = contactlib::open_folder_cache_with_local_notifier(
//!     "contacts",
//!     "/path/to/contacts",
//! )?;
//! if let Some(contact) = cache.get("alice@example.org")? {
//!     println!("{} {}", contact.display_name(), contact.phone_number());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

pub use contact_cache::{
    ChangeListener, ChangeNotifier, ContactCache, DirectoryClient,
    LocalNotifier, Subscription, SubscriptionHandle, Subscriptions,
};
pub use data_contact::{Contact, ContactTarget};
pub use data_error::{ContactError, Result};
pub use fs_directory::{
    FolderDirectory, AVATARS_FOLDER, ENTRY_EXTENSION, USERS_FOLDER,
};
#[cfg(feature = "watch")]
pub use fs_directory::{FolderNotifier, DEBOUNCE_TIMEOUT};

/// Builds a cache over the folder directory at `root`, refreshed by a
/// filesystem watcher on the same folder.
#[cfg(feature = "watch")]
pub fn open_folder_cache<P: AsRef<Path>>(
    label: &str,
    root: P,
) -> Result<ContactCache> {
    let directory = FolderDirectory::new(label, root.as_ref())?;
    let notifier = FolderNotifier::new(root.as_ref())?;
    log::info!("{} serving contacts from {:?}", label, root.as_ref());

    Ok(ContactCache::new(
        label,
        Arc::new(directory),
        Arc::new(notifier),
    ))
}

/// Builds a cache over the folder directory at `root`. Changes are
/// signalled by the host through the returned [`LocalNotifier`] or through
/// [`ContactCache::refresh_raw`].
pub fn open_folder_cache_with_local_notifier<P: AsRef<Path>>(
    label: &str,
    root: P,
) -> Result<(ContactCache, Arc<LocalNotifier>)> {
    let directory = FolderDirectory::new(label, root.as_ref())?;
    let notifier = Arc::new(LocalNotifier::new(label));
    let cache =
        ContactCache::new(label, Arc::new(directory), notifier.clone());
    Ok((cache, notifier))
}
