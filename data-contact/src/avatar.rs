use std::sync::Arc;

use image::DynamicImage;

/// Cached state of a contact's avatar.
///
/// The image only exists alongside the bytes it was decoded from.
#[derive(Default)]
pub(crate) enum AvatarSlot {
    #[default]
    Unloaded,
    /// The directory has no avatar for this entry.
    Missing,
    /// Bytes were loaded but could not be decoded.
    Malformed(Arc<[u8]>),
    Decoded {
        bytes: Arc<[u8]>,
        image: Arc<DynamicImage>,
    },
}

impl AvatarSlot {
    /// Builds the slot for freshly fetched bytes, decoding them right away.
    /// Empty bytes mean the same as no bytes.
    pub(crate) fn from_loaded(bytes: Option<Vec<u8>>) -> Self {
        let bytes: Arc<[u8]> = match bytes {
            Some(bytes) if !bytes.is_empty() => bytes.into(),
            _ => return Self::Missing,
        };

        match decode(&bytes) {
            Some(image) => Self::Decoded {
                bytes,
                image: Arc::new(image),
            },
            None => Self::Malformed(bytes),
        }
    }

    pub(crate) fn image(&self) -> Option<Arc<DynamicImage>> {
        match self {
            Self::Decoded { image, .. } => Some(image.clone()),
            _ => None,
        }
    }

    pub(crate) fn bytes(&self) -> Option<Arc<[u8]>> {
        match self {
            Self::Decoded { bytes, .. } | Self::Malformed(bytes) => {
                Some(bytes.clone())
            }
            Self::Unloaded | Self::Missing => None,
        }
    }
}

/// Decodes raw avatar bytes, guessing the format from their content.
/// Malformed data is logged and reported as no image.
fn decode(bytes: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory(bytes) {
        Ok(image) => Some(image),
        Err(err) => {
            log::warn!(
                "cannot decode avatar ({} bytes): {}",
                bytes.len(),
                err
            );
            None
        }
    }
}
