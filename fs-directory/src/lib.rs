//! # Folder Directory
//!
//! A [`DirectoryClient`](contact_cache::DirectoryClient) backed by a plain
//! folder, laid out as:
//!
//! ```text
//! <root>/users/<user_id>.json     contact fields
//! <root>/avatars/<directory_id>   raw avatar bytes
//! ```
//!
//! With the `watch` feature, [`FolderNotifier`] turns filesystem events in
//! that folder into change notifications.

mod folder;
#[cfg(feature = "watch")]
mod watch;

pub use folder::FolderDirectory;
#[cfg(feature = "watch")]
pub use watch::{FolderNotifier, DEBOUNCE_TIMEOUT};

pub const USERS_FOLDER: &str = "users";
pub const AVATARS_FOLDER: &str = "avatars";
pub const ENTRY_EXTENSION: &str = "json";
