use data_contact::Contact;
use data_error::Result;

/// The source of truth the cache is filled from.
///
/// "Not found" is always `Ok(None)`. An `Err` means the query mechanism
/// itself failed and is handed back to the caller untouched; the cache
/// never retries or remembers it.
pub trait DirectoryClient: Send + Sync {
    /// Looks up the entry for `user_id`. The returned contact carries
    /// every field except the avatar.
    fn resolve(&self, user_id: &str) -> Result<Option<Contact>>;

    /// Cheap lookup of just the phone number, never cached.
    fn phone_number_for(&self, user_id: &str) -> Result<Option<String>>;

    /// Raw avatar bytes for the entry `contact` was resolved from.
    /// `Ok(None)` (or empty bytes) means no avatar is set.
    fn load_avatar_bytes(&self, contact: &Contact) -> Result<Option<Vec<u8>>>;

    /// Maps a raw directory entry reference back to its user id.
    fn user_id_for(&self, raw_ref: &str) -> Result<Option<String>>;

    /// Every registered entry with its user id, in no particular order.
    fn registered(&self) -> Result<Vec<(String, Contact)>>;
}
