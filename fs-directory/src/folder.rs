use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use contact_cache::DirectoryClient;
use data_contact::Contact;
use data_error::{ContactError, Result};

use crate::{AVATARS_FOLDER, ENTRY_EXTENSION, USERS_FOLDER};

/// A directory of contacts stored as one JSON file per user.
pub struct FolderDirectory {
    /// Label for logging
    label: String,
    root: PathBuf,
}

/// The subset of an entry file needed for a phone number lookup.
#[derive(Deserialize)]
struct PhoneNumberOnly {
    phone_number: String,
}

impl FolderDirectory {
    /// Opens the directory at `root`, creating its folders if needed.
    pub fn new(label: impl Into<String>, root: &Path) -> Result<Self> {
        let directory = Self {
            label: label.into(),
            root: PathBuf::from(root),
        };

        fs::create_dir_all(directory.root.join(USERS_FOLDER))?;
        fs::create_dir_all(directory.root.join(AVATARS_FOLDER))?;

        log::debug!(
            "{} opened folder directory at {}",
            directory.label,
            directory.root.display()
        );
        Ok(directory)
    }

    /// Path of the entry file for `user_id`, or `None` if the id cannot be
    /// used as a file name.
    pub fn user_path(&self, user_id: &str) -> Option<PathBuf> {
        if !is_valid_user_id(user_id) {
            return None;
        }
        Some(
            self.root
                .join(USERS_FOLDER)
                .join(format!("{}.{}", user_id, ENTRY_EXTENSION)),
        )
    }

    pub fn avatar_path(&self, directory_id: i64) -> PathBuf {
        self.root
            .join(AVATARS_FOLDER)
            .join(directory_id.to_string())
    }

    /// Creates or replaces the entry for `user_id`.
    pub fn put(&self, user_id: &str, contact: &Contact) -> Result<()> {
        let path = self.checked_user_path(user_id)?;
        let data = serde_json::to_vec_pretty(contact)?;
        write_atomically(&path, &data)?;

        log::debug!("{} stored entry for user {}", self.label, user_id);
        Ok(())
    }

    /// Deletes the entry for `user_id`. Returns `false` if there was none.
    pub fn remove(&self, user_id: &str) -> Result<bool> {
        let path = self.checked_user_path(user_id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("{} removed entry for user {}", self.label, user_id);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn set_avatar(&self, directory_id: i64, bytes: &[u8]) -> Result<()> {
        write_atomically(&self.avatar_path(directory_id), bytes)
    }

    pub fn remove_avatar(&self, directory_id: i64) -> Result<()> {
        match fs::remove_file(self.avatar_path(directory_id)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn checked_user_path(&self, user_id: &str) -> Result<PathBuf> {
        self.user_path(user_id).ok_or_else(|| {
            ContactError::Storage(
                self.label.clone(),
                format!("Invalid user id {:?}", user_id),
            )
        })
    }

    /// Reads a file, treating a missing one as `None`.
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ContactError::Directory(format!(
                "{}: cannot read {}: {}",
                self.label,
                path.display(),
                err
            ))),
        }
    }

    fn read_entry<T>(&self, user_id: &str) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let Some(path) = self.user_path(user_id) else {
            return Ok(None);
        };
        match self.read(&path)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }
}

impl DirectoryClient for FolderDirectory {
    fn resolve(&self, user_id: &str) -> Result<Option<Contact>> {
        self.read_entry(user_id)
    }

    fn phone_number_for(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .read_entry::<PhoneNumberOnly>(user_id)?
            .map(|entry| entry.phone_number))
    }

    fn load_avatar_bytes(&self, contact: &Contact) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read(&self.avatar_path(contact.directory_id()))?
            .filter(|bytes| !bytes.is_empty()))
    }

    /// A raw reference is the path of an entry file; the user id is its
    /// file stem.
    fn user_id_for(&self, raw_ref: &str) -> Result<Option<String>> {
        let path = Path::new(raw_ref);
        let in_users_folder = path
            .parent()
            .and_then(Path::file_name)
            .map_or(false, |name| name == USERS_FOLDER);
        let is_entry = path
            .extension()
            .map_or(false, |ext| ext == ENTRY_EXTENSION);
        if !in_users_folder || !is_entry {
            return Ok(None);
        }

        Ok(path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| is_valid_user_id(stem))
            .map(str::to_owned))
    }

    fn registered(&self) -> Result<Vec<(String, Contact)>> {
        let mut contacts = Vec::new();

        for entry in fs::read_dir(self.root.join(USERS_FOLDER))? {
            let path = entry?.path();
            let Some(user_id) = self.user_id_for(&path.to_string_lossy())?
            else {
                continue;
            };

            let data = match self.read(&path)? {
                Some(data) => data,
                None => continue,
            };
            match serde_json::from_slice::<Contact>(&data) {
                Ok(contact) if contact.is_registered() => {
                    contacts.push((user_id, contact))
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!(
                        "{} skipping unreadable entry {}: {}",
                        self.label,
                        path.display(),
                        err
                    );
                }
            }
        }

        log::debug!(
            "{} listed {} registered entries",
            self.label,
            contacts.len()
        );
        Ok(contacts)
    }
}

fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && !user_id.starts_with('.')
        && !user_id.contains(|c: char| c == '/' || c == '\\')
}

/// Writes to a hidden temporary file next to `path` and renames it into
/// place, so readers never see a partial file.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            ContactError::Storage(
                "folder".to_owned(),
                format!("Invalid file path {}", path.display()),
            )
        })?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&temp_path, data)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempdir::TempDir;

    fn create_directory(temp_dir: &TempDir) -> FolderDirectory {
        FolderDirectory::new("test", temp_dir.path())
            .expect("Failed to create directory")
    }

    fn alice() -> Contact {
        Contact::new(42, "abc", "Alice", "+1000", "h1", true)
    }

    #[test]
    fn new_creates_layout() {
        let temp_dir = TempDir::new("tmp").unwrap();
        create_directory(&temp_dir);
        assert!(temp_dir.path().join(USERS_FOLDER).is_dir());
        assert!(temp_dir.path().join(AVATARS_FOLDER).is_dir());
    }

    #[test]
    fn stored_entry_resolves() {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);

        directory.put("u1", &alice()).unwrap();

        let resolved = directory.resolve("u1").unwrap();
        assert_eq!(resolved, Some(alice()));
        assert_eq!(
            directory.phone_number_for("u1").unwrap().as_deref(),
            Some("+1000")
        );
    }

    #[rstest]
    #[case::unknown("ghost")]
    #[case::empty("")]
    #[case::traversal("../escape")]
    #[case::hidden(".hidden")]
    fn unusable_user_ids_resolve_to_nothing(#[case] user_id: &str) {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);

        assert!(directory.resolve(user_id).unwrap().is_none());
        assert!(directory.phone_number_for(user_id).unwrap().is_none());
    }

    #[test]
    fn put_rejects_invalid_user_id() {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);

        let err = directory.put("a/b", &alice()).unwrap_err();
        assert!(matches!(err, ContactError::Storage(_, _)));
    }

    #[test]
    fn corrupt_entry_is_a_parse_error() {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);
        fs::write(directory.user_path("u1").unwrap(), b"{ not json").unwrap();

        assert!(matches!(
            directory.resolve("u1"),
            Err(ContactError::Parse)
        ));
    }

    #[test]
    fn remove_reports_whether_entry_existed() {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);
        directory.put("u1", &alice()).unwrap();

        assert!(directory.remove("u1").unwrap());
        assert!(!directory.remove("u1").unwrap());
        assert!(directory.resolve("u1").unwrap().is_none());
    }

    #[test]
    fn avatar_bytes_are_loaded_by_directory_id() {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);
        let contact = alice();

        assert!(directory.load_avatar_bytes(&contact).unwrap().is_none());

        directory.set_avatar(42, &[]).unwrap();
        assert!(directory.load_avatar_bytes(&contact).unwrap().is_none());

        directory.set_avatar(42, &[1, 2, 3]).unwrap();
        assert_eq!(
            directory.load_avatar_bytes(&contact).unwrap(),
            Some(vec![1, 2, 3])
        );

        directory.remove_avatar(42).unwrap();
        directory.remove_avatar(42).unwrap();
        assert!(directory.load_avatar_bytes(&contact).unwrap().is_none());
    }

    #[rstest]
    #[case("/data/users/u1.json", Some("u1"))]
    #[case("users/alice.bob.json", Some("alice.bob"))]
    #[case("/data/avatars/42", None)]
    #[case("/data/users/u1.txt", None)]
    #[case("/data/users/.u1.json.tmp", None)]
    #[case("/data/other/u1.json", None)]
    fn raw_reference_maps_to_user_id(
        #[case] raw_ref: &str,
        #[case] expected: Option<&str>,
    ) {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);

        assert_eq!(
            directory.user_id_for(raw_ref).unwrap().as_deref(),
            expected
        );
    }

    #[test_log::test]
    fn registered_skips_unregistered_and_unreadable() {
        let temp_dir = TempDir::new("tmp").unwrap();
        let directory = create_directory(&temp_dir);
        directory.put("u1", &alice()).unwrap();
        directory
            .put("u2", &Contact::new(2, "k2", "Bob", "+2", "h2", false))
            .unwrap();
        fs::write(directory.user_path("u3").unwrap(), b"garbage").unwrap();
        fs::write(temp_dir.path().join(USERS_FOLDER).join("notes.txt"), b"")
            .unwrap();

        let registered = directory.registered().unwrap();

        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0, "u1");
        assert_eq!(registered[0].1, alice());
    }
}
