//! Strongly-typed identifiers.
//!
//! Bus names and object paths are validated at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed string newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
macro_rules! define_name {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// Caller identity: the unique bus name of the peer that issued a request.
define_name!(ClientId);

/// Hierarchical object address on the bus (`/org/freedesktop/InputMethod`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if !s.starts_with('/') {
            return Err("ObjectPath must start with '/'");
        }
        if s.len() > 1 {
            if s.ends_with('/') {
                return Err("ObjectPath must not end with '/'");
            }
            for segment in s[1..].split('/') {
                if !is_valid_segment(segment) {
                    return Err("ObjectPath segments must be non-empty [A-Za-z0-9_]");
                }
            }
        }
        Ok(Self(s))
    }

    /// Object path an application id maps to: dots become slashes, dashes
    /// become underscores (`org.gtk.Test-IM` → `/org/gtk/Test_IM`).
    pub fn from_application_id(application_id: &str) -> Result<Self, &'static str> {
        let mut path = String::with_capacity(application_id.len() + 1);
        path.push('/');
        for c in application_id.chars() {
            match c {
                '.' => path.push('/'),
                '-' => path.push('_'),
                c => path.push(c),
            }
        }
        Self::from_string(path)
    }

    /// Append one segment.
    pub fn child(&self, segment: &str) -> Result<Self, &'static str> {
        if !is_valid_segment(segment) {
            return Err("ObjectPath segments must be non-empty [A-Za-z0-9_]");
        }
        if self.0 == "/" {
            Ok(Self(format!("/{segment}")))
        } else {
            Ok(Self(format!("{}/{}", self.0, segment)))
        }
    }

    /// Final segment (`Engine_3` for `/org/gtk/Foo/Engine_3`).
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TryFrom<String> for ObjectPath {
    type Error = &'static str;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_string(s)
    }
}

impl From<ObjectPath> for String {
    fn from(path: ObjectPath) -> Self {
        path.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by a name-ownership request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(pub(crate) u64);

/// Handle returned by a name watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) u64);
