use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::{fs, thread, time::Duration};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, Debouncer, FileIdMap};

use contact_cache::{
    ChangeListener, ChangeNotifier, SubscriptionHandle, Subscriptions,
};
use data_contact::ContactTarget;
use data_error::{ContactError, Result};

use crate::{AVATARS_FOLDER, ENTRY_EXTENSION, USERS_FOLDER};

/// Rapid successive writes to one file are collapsed into a single change.
pub const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(500);

/// What a filesystem event inside the directory folder refers to.
#[derive(Debug, PartialEq, Eq)]
enum Change {
    User(String),
    Avatar(i64),
}

impl Change {
    fn from_path(root: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let mut components = relative.iter();
        let folder = components.next()?;
        let file = Path::new(components.next()?);
        if components.next().is_some() {
            return None;
        }

        let name = file.to_str()?;
        if name.starts_with('.') {
            return None;
        }

        if folder == USERS_FOLDER {
            if file.extension()? != ENTRY_EXTENSION {
                return None;
            }
            let user_id = file.file_stem()?.to_str()?;
            Some(Change::User(user_id.to_owned()))
        } else if folder == AVATARS_FOLDER {
            name.parse().ok().map(Change::Avatar)
        } else {
            None
        }
    }

    fn matches(&self, user_id: &str, target: &ContactTarget) -> bool {
        match self {
            Change::User(changed) => changed == user_id,
            Change::Avatar(directory_id) => *directory_id == target.directory_id,
        }
    }
}

/// A [`ChangeNotifier`] fed by a filesystem watcher on a
/// [`FolderDirectory`](crate::FolderDirectory) root.
///
/// Changing `users/<user_id>.json` notifies subscriptions made for that
/// user id; changing `avatars/<directory_id>` notifies subscriptions whose
/// target carries that directory id. Listeners run on the watcher's
/// background thread, which stops when the notifier is dropped.
pub struct FolderNotifier {
    subscriptions: Arc<Subscriptions>,
    _debouncer: Debouncer<RecommendedWatcher, FileIdMap>,
}

impl FolderNotifier {
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        log::debug!(
            "Attempting to watch directory at root path: {:?}",
            root_path.as_ref()
        );

        let root_path = fs::canonicalize(root_path.as_ref())?;
        let subscriptions = Arc::new(Subscriptions::new());

        // The debouncer delivers into a synchronous channel drained by a
        // dedicated thread
        let (sync_tx, sync_rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(DEBOUNCE_TIMEOUT, None, sync_tx)
            .map_err(|err| ContactError::Other(err.into()))?;
        debouncer
            .watcher()
            .watch(&root_path, RecursiveMode::Recursive)
            .map_err(|err| ContactError::Other(err.into()))?;
        log::info!("Started debouncer file system watcher for {:?}", root_path);

        let dispatcher = Arc::clone(&subscriptions);
        thread::spawn(move || {
            while let Ok(events) = sync_rx.recv() {
                let events = match events {
                    Ok(evts) => evts,
                    Err(errs) => {
                        for err in errs {
                            log::error!("Error receiving event: {:?}", err);
                        }
                        continue;
                    }
                };

                for event in events {
                    log::trace!("Received event: {:?}", event);
                    if let EventKind::Access(_) = event.event.kind {
                        continue;
                    }
                    dispatch(&dispatcher, &root_path, &event.event.paths);
                }
            }
            log::debug!("Stopped file system watcher for {:?}", root_path);
        });

        Ok(Self {
            subscriptions,
            _debouncer: debouncer,
        })
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

fn dispatch(subscriptions: &Subscriptions, root: &Path, paths: &[PathBuf]) {
    for path in paths {
        let Some(change) = Change::from_path(root, path) else {
            continue;
        };
        let reached = subscriptions.dispatch(|subscription| {
            change.matches(subscription.user_id(), subscription.target())
        });
        log::debug!("Change {:?} reached {} listeners", change, reached);
    }
}

impl ChangeNotifier for FolderNotifier {
    fn subscribe(
        &self,
        target: &ContactTarget,
        user_id: &str,
        listener: Weak<dyn ChangeListener>,
    ) -> SubscriptionHandle {
        self.subscriptions
            .insert(target, user_id, listener)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.remove(handle);
    }
}
