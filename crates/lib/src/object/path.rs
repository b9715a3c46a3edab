//! Flat path keys.
//!
//! A nested property is stored under one key of a flat replicated map, made of its
//! path segments joined with `.`. Numeric segments denote array positions. The
//! [`Path`]/[`PathBuf`] pair follows the borrowed/owned pattern of
//! `std::path::Path`/`PathBuf`.
//!
//! ```rust
//! use collabmap::object::path::PathBuf;
//!
//! let address = PathBuf::root().join("address");
//! let city = address.join("city");
//! assert_eq!(city.as_str(), "address.city");
//! assert_eq!(address.descendant_prefix(), "address.");
//! assert_eq!(address.strip_descendant("address.city"), Some("city"));
//! ```

use std::{fmt, ops::Deref, str::FromStr};

use super::ObjectError;
use crate::constants::{MAX_ARRAY_POSITION, PATH_SEPARATOR};

/// Normalizes a path string by removing empty segments.
///
/// ```rust
/// # use collabmap::object::path::normalize_path;
/// assert_eq!(normalize_path(".items..0."), "items.0");
/// assert_eq!(normalize_path("..."), "");
/// ```
pub fn normalize_path(input: &str) -> String {
    input
        .split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Parses a segment naming an array position.
///
/// Only canonical non-negative integers qualify: `"0"`, `"7"`, `"12"`. Segments with
/// leading zeros or signs are plain field names, so `"01"` and `"+1"` are rejected.
/// So are positions above [`MAX_ARRAY_POSITION`], which keeps a stray huge key from
/// turning its parent into an enormous array.
pub fn parse_index(segment: &str) -> Option<usize> {
    let canonical = !segment.is_empty()
        && segment.bytes().all(|b| b.is_ascii_digit())
        && (segment == "0" || !segment.starts_with('0'));
    if !canonical {
        return None;
    }
    segment
        .parse()
        .ok()
        .filter(|&position| position <= MAX_ARRAY_POSITION)
}

/// Checks that `name` can be used as a single path segment.
pub fn validate_field(name: &str) -> Result<(), ObjectError> {
    if name.is_empty() {
        return Err(ObjectError::InvalidField {
            field: name.to_string(),
            reason: "field names cannot be empty",
        });
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(ObjectError::InvalidField {
            field: name.to_string(),
            reason: "field names cannot contain '.'",
        });
    }
    Ok(())
}

/// A borrowed flat path.
///
/// This type is unsized and must always be used behind a reference.
#[derive(Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Path {
    inner: str,
}

/// An owned flat path. The empty path addresses the root of a map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathBuf {
    inner: String,
}

impl Path {
    /// Wraps an already normalized path string.
    fn from_normalized(s: &str) -> &Path {
        // SAFETY: Path is a transparent wrapper around str
        unsafe { &*(s as *const str as *const Path) }
    }

    /// Returns the path as a string slice
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Returns `true` for the root path
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over the path segments
    pub fn components(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.inner.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Number of segments in the path
    pub fn len(&self) -> usize {
        self.components().count()
    }

    /// Returns the last segment, or `None` for the root
    pub fn file_name(&self) -> Option<&str> {
        self.components().next_back()
    }

    /// Returns the parent path, or `None` for the root
    pub fn parent(&self) -> Option<&Path> {
        if self.inner.is_empty() {
            return None;
        }
        Some(match self.inner.rfind(PATH_SEPARATOR) {
            Some(last) => Path::from_normalized(&self.inner[..last]),
            None => Path::from_normalized(""),
        })
    }

    /// Prefix shared by every strict descendant key: `"path."`, or `""` for the root.
    pub fn descendant_prefix(&self) -> String {
        if self.inner.is_empty() {
            String::new()
        } else {
            format!("{}{PATH_SEPARATOR}", &self.inner)
        }
    }

    /// Returns the part of `key` below this path, if `key` is a strict descendant.
    pub fn strip_descendant<'k>(&self, key: &'k str) -> Option<&'k str> {
        if self.inner.is_empty() {
            return (!key.is_empty()).then_some(key);
        }
        key.strip_prefix(&self.inner)?
            .strip_prefix(PATH_SEPARATOR)
            .filter(|rest| !rest.is_empty())
    }

    /// Returns the first segment of `key` below this path.
    pub fn child_segment<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = self.strip_descendant(key)?;
        rest.split(PATH_SEPARATOR).next().filter(|s| !s.is_empty())
    }

    /// Returns true if `key` is this path or one of its descendants
    pub fn covers(&self, key: &str) -> bool {
        key == &self.inner || self.strip_descendant(key).is_some()
    }

    /// Converts to an owned [`PathBuf`]
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf {
            inner: self.inner.to_string(),
        }
    }
}

impl PathBuf {
    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    /// Creates a path by normalizing `path`
    pub fn normalize(path: &str) -> Self {
        Self {
            inner: normalize_path(path),
        }
    }

    /// Returns the path of `field` below this one.
    ///
    /// The field is not validated; use [`validate_field`] on untrusted names.
    pub fn join(&self, field: impl AsRef<str>) -> PathBuf {
        let field = field.as_ref();
        if self.inner.is_empty() {
            return PathBuf {
                inner: field.to_string(),
            };
        }
        PathBuf {
            inner: format!("{}{PATH_SEPARATOR}{field}", self.inner),
        }
    }

    /// Returns the path of array position `index` below this one
    pub fn join_index(&self, index: usize) -> PathBuf {
        self.join(index.to_string())
    }
}

impl Deref for PathBuf {
    type Target = Path;

    fn deref(&self) -> &Path {
        Path::from_normalized(&self.inner)
    }
}

impl AsRef<Path> for PathBuf {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl FromStr for PathBuf {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::normalize(s))
    }
}

impl From<&str> for PathBuf {
    fn from(s: &str) -> Self {
        Self::normalize(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.is_empty() {
            write!(f, "(root)")
        } else {
            write!(f, "{}", &self.inner)
        }
    }
}

impl fmt::Display for PathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.deref(), f)
    }
}
