use std::io::Cursor;
use std::sync::Arc;

use contactlib::{
    open_folder_cache_with_local_notifier, Contact, DirectoryClient,
    FolderDirectory,
};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use tempdir::TempDir;

fn alice(registered: bool) -> Contact {
    Contact::new(42, "abc", "Alice", "+1000", "h1", registered)
}

fn fallback() -> Arc<DynamicImage> {
    Arc::new(DynamicImage::new_rgb8(1, 1))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageOutputFormat::Png)
        .expect("Failed to encode png");
    buffer.into_inner()
}

#[test_log::test]
fn folder_cache_fills_and_refreshes() {
    let temp_dir = TempDir::new("contacts").unwrap();
    let directory = FolderDirectory::new("seed", temp_dir.path()).unwrap();
    directory.put("u1", &alice(true)).unwrap();

    let (cache, notifier) =
        open_folder_cache_with_local_notifier("test", temp_dir.path()).unwrap();

    let first = cache.get("u1").unwrap().expect("u1 should resolve");
    assert_eq!(*first, alice(true));
    assert!(Arc::ptr_eq(&first, &cache.get("u1").unwrap().unwrap()));
    assert_eq!(notifier.subscription_count(), 1);

    // The cache keeps serving the old snapshot until told otherwise
    directory.put("u1", &alice(false)).unwrap();
    assert!(cache.get("u1").unwrap().unwrap().is_registered());

    let raw_ref = directory.user_path("u1").unwrap();
    cache
        .refresh_raw(&raw_ref.to_string_lossy())
        .unwrap();

    let updated = cache.get("u1").unwrap().unwrap();
    assert!(!updated.is_registered());
    assert_eq!(updated.display_name(), "Alice");
    assert_eq!(notifier.subscription_count(), 1);
}

#[test]
fn deleted_entry_disappears_after_change() {
    let temp_dir = TempDir::new("contacts").unwrap();
    let directory = FolderDirectory::new("seed", temp_dir.path()).unwrap();
    directory.put("u1", &alice(true)).unwrap();

    let (cache, notifier) =
        open_folder_cache_with_local_notifier("test", temp_dir.path()).unwrap();
    let contact = cache.get("u1").unwrap().unwrap();

    directory.remove("u1").unwrap();
    notifier.notify(&contact.target());

    assert!(!cache.is_cached("u1"));
    assert!(cache.get("u1").unwrap().is_none());
    assert_eq!(notifier.subscription_count(), 0);
}

#[test]
fn avatars_load_lazily_from_folder() {
    let temp_dir = TempDir::new("contacts").unwrap();
    let directory = FolderDirectory::new("seed", temp_dir.path()).unwrap();
    directory.put("u1", &alice(true)).unwrap();
    directory
        .put("u2", &Contact::new(7, "k7", "Bob", "+7", "h7", true))
        .unwrap();
    directory.set_avatar(42, &png_bytes(5, 3)).unwrap();
    directory.set_avatar(7, b"not an image").unwrap();

    let (cache, _notifier) =
        open_folder_cache_with_local_notifier("test", temp_dir.path()).unwrap();
    let fallback = fallback();

    let alice = cache.get("u1").unwrap().unwrap();
    assert!(!alice.is_avatar_loaded());
    let image = cache.avatar(&alice, &fallback);
    assert_eq!((image.width(), image.height()), (5, 3));

    // Cached: deleting the file does not affect the decoded avatar
    directory.remove_avatar(42).unwrap();
    assert!(Arc::ptr_eq(&image, &cache.avatar(&alice, &fallback)));

    // Released: the next request goes back to the folder
    cache.release(&alice);
    assert!(Arc::ptr_eq(&cache.avatar(&alice, &fallback), &fallback));

    let bob = cache.get("u2").unwrap().unwrap();
    assert!(Arc::ptr_eq(&cache.avatar(&bob, &fallback), &fallback));
    assert!(cache.is_cached("u2"));
}

#[test]
fn registered_listing_is_ordered_and_uncached() {
    let temp_dir = TempDir::new("contacts").unwrap();
    let directory = FolderDirectory::new("seed", temp_dir.path()).unwrap();
    directory
        .put("u1", &Contact::new(1, "k1", "carol", "+1", "h1", true))
        .unwrap();
    directory
        .put("u2", &Contact::new(2, "k2", "Bob", "+2", "h2", true))
        .unwrap();
    directory
        .put("u3", &Contact::new(3, "k3", "Alice", "+3", "h3", false))
        .unwrap();

    let (cache, _notifier) =
        open_folder_cache_with_local_notifier("test", temp_dir.path()).unwrap();

    let names: Vec<String> = cache
        .registered()
        .unwrap()
        .iter()
        .map(|(_, contact)| contact.display_name().to_owned())
        .collect();

    assert_eq!(names, vec!["Bob", "carol"]);
    assert!(cache.is_empty());
}

#[test]
fn phone_number_lookup_matches_directory() {
    let temp_dir = TempDir::new("contacts").unwrap();
    let directory = FolderDirectory::new("seed", temp_dir.path()).unwrap();
    directory.put("u1", &alice(true)).unwrap();

    let (cache, _notifier) =
        open_folder_cache_with_local_notifier("test", temp_dir.path()).unwrap();

    assert_eq!(
        cache.phone_number_for("u1").unwrap(),
        directory.phone_number_for("u1").unwrap()
    );
    assert!(!cache.is_cached("u1"));
}

#[cfg(feature = "watch")]
#[test_log::test]
fn watched_folder_refreshes_cache() {
    use std::thread;
    use std::time::{Duration, Instant};

    let temp_dir = TempDir::new("contacts").unwrap();
    let directory = FolderDirectory::new("seed", temp_dir.path()).unwrap();
    directory.put("u1", &alice(true)).unwrap();

    let cache = contactlib::open_folder_cache("test", temp_dir.path()).unwrap();
    assert!(cache.get("u1").unwrap().unwrap().is_registered());

    directory.put("u1", &alice(false)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if !cache.get("u1").unwrap().unwrap().is_registered() {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "cache was not refreshed by the watcher"
        );
        thread::sleep(Duration::from_millis(50));
    }
}
