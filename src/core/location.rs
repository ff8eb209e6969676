//! Purpose: Resolve a specification's location string to local storage.
//! Exports: `local_path`, `uri_scheme`.
//! Role: Shared by every file-backed backend so location semantics stay aligned.
//! Invariants: `file:` URIs map to local paths; other schemes are unsupported.
//! Invariants: Plain strings are filesystem paths, relative to the process cwd.

use std::path::PathBuf;

use url::Url;

use crate::core::error::{Error, ErrorKind};

/// Returns the URI scheme when `location` is an absolute URI.
///
/// Single-letter schemes are treated as Windows drive prefixes, not URIs.
pub fn uri_scheme(location: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    if url.scheme().len() < 2 {
        return None;
    }
    Some(url.scheme().to_string())
}

pub fn local_path(location: &str) -> Result<PathBuf, Error> {
    match uri_scheme(location).as_deref() {
        None => Ok(PathBuf::from(location)),
        Some("file") => {
            let url = Url::parse(location).map_err(|err| {
                Error::new(ErrorKind::InvalidSpec)
                    .with_message(format!("invalid file URI `{location}`"))
                    .with_source(err)
            })?;
            url.to_file_path().map_err(|()| {
                Error::new(ErrorKind::InvalidSpec)
                    .with_message(format!("file URI `{location}` has no local path"))
            })
        }
        Some(scheme) => Err(Error::new(ErrorKind::Unsupported)
            .with_message(format!("`{scheme}` locations are not supported"))
            .with_hint("Use a local path or a file:// URI.")),
    }
}

#[cfg(test)]
mod tests {
    use super::{local_path, uri_scheme};
    use crate::core::error::ErrorKind;
    use std::path::PathBuf;

    #[test]
    fn plain_paths_pass_through() {
        let path = local_path("sample-data/breeds.tab").expect("path");
        assert_eq!(path, PathBuf::from("sample-data/breeds.tab"));
    }

    #[cfg(unix)]
    #[test]
    fn file_uri_resolves_to_path() {
        let path = local_path("file:///tmp/breeds.tab").expect("path");
        assert_eq!(path, PathBuf::from("/tmp/breeds.tab"));
    }

    #[test]
    fn remote_scheme_is_unsupported() {
        let err = local_path("https://example.com/breeds.tab").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn drive_letters_are_not_schemes() {
        assert_eq!(uri_scheme(r"C:\data\breeds.tab"), None);
        assert_eq!(uri_scheme("breeds.tab"), None);
        assert_eq!(uri_scheme("file:///x").as_deref(), Some("file"));
    }
}
