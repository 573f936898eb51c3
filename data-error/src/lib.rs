use std::str::Utf8Error;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContactError>;

#[derive(Error, Debug)]
pub enum ContactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parsing error")]
    Parse,
    /// The directory query itself failed. Never cached.
    #[error("Directory error: {0}")]
    Directory(String),
    #[error("Storage error: {0} {1}")]
    Storage(String, String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<Utf8Error> for ContactError {
    fn from(_: Utf8Error) -> Self {
        Self::Parse
    }
}

impl From<serde_json::Error> for ContactError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_failures_map_to_parse() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        assert!(matches!(ContactError::from(err), ContactError::Parse));
    }

    #[test]
    fn directory_error_displays_reason() {
        let err = ContactError::Directory("permission denied".to_owned());
        assert_eq!(err.to_string(), "Directory error: permission denied");
    }

    #[test]
    fn io_error_converts_with_question_mark() {
        fn open() -> Result<()> {
            std::fs::File::open("/definitely/not/here")?;
            Ok(())
        }
        assert!(matches!(open(), Err(ContactError::Io(_))));
    }
}
