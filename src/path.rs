//! Path tokenizing. The store itself only sees component slices; these
//! helpers turn `"a/b/c"` into components and back for messages and tests.

use crate::config::MAX_NAME_LEN;
use crate::{Error, Result};

/// Splits a `/`-separated path into components, ignoring empty ones.
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins components with `/`. The root is `/`.
pub fn display<S: AsRef<str>>(path: &[S]) -> String {
    if path.is_empty() {
        return "/".into();
    }
    path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("/")
}

/// Checks a name about to be stored in a head.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\0'])
        || name.len() > MAX_NAME_LEN
    {
        return Err(Error::InvalidName(name.into()));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_and_join() {
        assert_eq!(components("/a//b/c/"), vec!["a", "b", "c"]);
        assert!(components("/").is_empty());
        assert_eq!(display(&["a", "b"]), "a/b");
        assert_eq!(display::<&str>(&[]), "/");
    }

    #[test]
    fn name_rules() {
        validate_name("file.txt").unwrap();
        validate_name(&"x".repeat(MAX_NAME_LEN)).unwrap();
        for bad in ["", ".", "..", "a/b", "nul\0"] {
            assert!(validate_name(bad).is_err(), "{bad:?}");
        }
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
