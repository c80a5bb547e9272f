//! # ByteView
//!
//! Immutable view over a cached value.
//!
//! Values are backed by [`bytes::Bytes`], so clones are reference-count
//! bumps and the slab shared between the cache and its readers can never
//! be mutated after publication. Borrowed inputs are copied on ingest;
//! owned inputs transfer their buffer without copying.

use std::fmt;

use bytes::Bytes;

/// Immutable byte value stored in a cache tier.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Empty view.
    pub const fn empty() -> Self {
        ByteView { data: Bytes::new() }
    }

    /// Copies a borrowed slice into an owned view.
    pub fn copy_from(bytes: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(bytes),
        }
    }

    /// Number of bytes in the view.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-length view.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrows the underlying bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copies the bytes into a fresh vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Views the bytes as UTF-8.
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.data)
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(value: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(value),
        }
    }
}

impl From<String> for ByteView {
    fn from(value: String) -> Self {
        ByteView {
            data: Bytes::from(value.into_bytes()),
        }
    }
}

impl From<Bytes> for ByteView {
    fn from(data: Bytes) -> Self {
        ByteView { data }
    }
}

impl From<&[u8]> for ByteView {
    fn from(value: &[u8]) -> Self {
        ByteView::copy_from(value)
    }
}

impl From<&str> for ByteView {
    fn from(value: &str) -> Self {
        ByteView::copy_from(value.as_bytes())
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() <= 32 {
            write!(f, "ByteView({:?})", String::from_utf8_lossy(&self.data))
        } else {
            write!(f, "ByteView({}B)", self.len())
        }
    }
}
