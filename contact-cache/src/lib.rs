mod cache;
mod directory;
mod notifier;

pub use cache::ContactCache;
pub use directory::DirectoryClient;
pub use notifier::{
    ChangeListener, ChangeNotifier, LocalNotifier, Subscription,
    SubscriptionHandle, Subscriptions,
};

pub use data_contact::{Contact, ContactTarget};
pub use data_error::{ContactError, Result};
