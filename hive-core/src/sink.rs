//! # Sinks
//!
//! Typed receivers the loader writes its result into. Every sink converts
//! what it is handed into a canonical [`ByteView`] (the form the cache
//! stores) while also writing through to the caller's destination in its
//! native type.
//!
//! A loader must call exactly one setter on success. Reading [`Sink::view`]
//! before any setter ran reports a sink error.
//!
//! Borrowed inputs are copied; a sink never aliases the loader's buffers.

use serde::de::DeserializeOwned;
use serde_json::Value;

use hive_common::error::{CacheError, CacheResult};
use hive_common::types::Expiry;

use crate::byteview::ByteView;

/// Receiver for a loaded value.
pub trait Sink: Send {
    /// Accepts a string value.
    fn set_string(&mut self, value: &str, expire: Expiry) -> CacheResult<()>;

    /// Accepts raw bytes; the slice is copied.
    fn set_bytes(&mut self, value: &[u8], expire: Expiry) -> CacheResult<()>;

    /// Accepts an already-canonical view without copying.
    fn set_view(&mut self, view: ByteView, expire: Expiry) -> CacheResult<()>;

    /// Accepts a JSON document; the canonical form is its serialization.
    fn set_json(&mut self, value: &Value, expire: Expiry) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|err| CacheError::Sink(format!("encoding json: {err}")))?;
        self.set_bytes(&bytes, expire)
    }

    /// Canonical cached form of whatever was set.
    fn view(&self) -> CacheResult<ByteView>;
}

fn unpopulated() -> CacheError {
    CacheError::Sink("no value was set".to_string())
}

/// Sink writing through to a caller-owned `String`.
///
/// Byte input is converted lossily, matching how the wire delivers values
/// that were stored as strings elsewhere in the fleet.
pub struct StringSink<'a> {
    dst: &'a mut String,
    view: Option<ByteView>,
}

impl<'a> StringSink<'a> {
    pub fn new(dst: &'a mut String) -> Self {
        StringSink { dst, view: None }
    }
}

impl Sink for StringSink<'_> {
    fn set_string(&mut self, value: &str, _expire: Expiry) -> CacheResult<()> {
        self.dst.clear();
        self.dst.push_str(value);
        self.view = Some(ByteView::from(value));
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8], _expire: Expiry) -> CacheResult<()> {
        *self.dst = String::from_utf8_lossy(value).into_owned();
        self.view = Some(ByteView::copy_from(value));
        Ok(())
    }

    fn set_view(&mut self, view: ByteView, _expire: Expiry) -> CacheResult<()> {
        *self.dst = String::from_utf8_lossy(view.as_slice()).into_owned();
        self.view = Some(view);
        Ok(())
    }

    fn view(&self) -> CacheResult<ByteView> {
        self.view.clone().ok_or_else(unpopulated)
    }
}

/// Allocating sink writing through to a caller-owned `Vec<u8>`.
pub struct ByteSink<'a> {
    dst: &'a mut Vec<u8>,
    view: Option<ByteView>,
}

impl<'a> ByteSink<'a> {
    pub fn new(dst: &'a mut Vec<u8>) -> Self {
        ByteSink { dst, view: None }
    }
}

impl Sink for ByteSink<'_> {
    fn set_string(&mut self, value: &str, expire: Expiry) -> CacheResult<()> {
        self.set_bytes(value.as_bytes(), expire)
    }

    fn set_bytes(&mut self, value: &[u8], _expire: Expiry) -> CacheResult<()> {
        *self.dst = value.to_vec();
        self.view = Some(ByteView::copy_from(value));
        Ok(())
    }

    fn set_view(&mut self, view: ByteView, _expire: Expiry) -> CacheResult<()> {
        *self.dst = view.to_vec();
        self.view = Some(view);
        Ok(())
    }

    fn view(&self) -> CacheResult<ByteView> {
        self.view.clone().ok_or_else(unpopulated)
    }
}

/// Sink copying into a caller-supplied buffer, truncating past its length.
///
/// The canonical view keeps the full value; only the write-through is
/// truncated. [`TruncatingSink::written`] reports how many bytes landed.
pub struct TruncatingSink<'a> {
    dst: &'a mut [u8],
    written: usize,
    view: Option<ByteView>,
}

impl<'a> TruncatingSink<'a> {
    pub fn new(dst: &'a mut [u8]) -> Self {
        TruncatingSink {
            dst,
            written: 0,
            view: None,
        }
    }

    /// Bytes copied into the caller's buffer by the last setter.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl Sink for TruncatingSink<'_> {
    fn set_string(&mut self, value: &str, expire: Expiry) -> CacheResult<()> {
        self.set_bytes(value.as_bytes(), expire)
    }

    fn set_bytes(&mut self, value: &[u8], _expire: Expiry) -> CacheResult<()> {
        let n = value.len().min(self.dst.len());
        self.dst[..n].copy_from_slice(&value[..n]);
        self.written = n;
        self.view = Some(ByteView::copy_from(value));
        Ok(())
    }

    fn set_view(&mut self, view: ByteView, _expire: Expiry) -> CacheResult<()> {
        let bytes = view.as_slice();
        let n = bytes.len().min(self.dst.len());
        self.dst[..n].copy_from_slice(&bytes[..n]);
        self.written = n;
        self.view = Some(view);
        Ok(())
    }

    fn view(&self) -> CacheResult<ByteView> {
        self.view.clone().ok_or_else(unpopulated)
    }
}

/// Typed sink deserializing JSON into a caller-owned value.
pub struct JsonSink<'a, T> {
    dst: &'a mut T,
    view: Option<ByteView>,
}

impl<'a, T: DeserializeOwned + Send> JsonSink<'a, T> {
    pub fn new(dst: &'a mut T) -> Self {
        JsonSink { dst, view: None }
    }

    fn decode(&mut self, bytes: &[u8]) -> CacheResult<()> {
        *self.dst = serde_json::from_slice(bytes)
            .map_err(|err| CacheError::Sink(format!("decoding json: {err}")))?;
        Ok(())
    }
}

impl<T: DeserializeOwned + Send> Sink for JsonSink<'_, T> {
    fn set_string(&mut self, value: &str, expire: Expiry) -> CacheResult<()> {
        self.set_bytes(value.as_bytes(), expire)
    }

    fn set_bytes(&mut self, value: &[u8], _expire: Expiry) -> CacheResult<()> {
        self.decode(value)?;
        self.view = Some(ByteView::copy_from(value));
        Ok(())
    }

    fn set_view(&mut self, view: ByteView, _expire: Expiry) -> CacheResult<()> {
        self.decode(view.as_slice())?;
        self.view = Some(view);
        Ok(())
    }

    fn set_json(&mut self, value: &Value, _expire: Expiry) -> CacheResult<()> {
        *self.dst = serde_json::from_value(value.clone())
            .map_err(|err| CacheError::Sink(format!("decoding json: {err}")))?;
        let bytes = serde_json::to_vec(value)
            .map_err(|err| CacheError::Sink(format!("encoding json: {err}")))?;
        self.view = Some(ByteView::from(bytes));
        Ok(())
    }

    fn view(&self) -> CacheResult<ByteView> {
        self.view.clone().ok_or_else(unpopulated)
    }
}

/// Internal receiver the engine hands to loaders: keeps the canonical view
/// and the deadline so the flight can populate the cache.
#[derive(Default)]
pub(crate) struct ViewSink {
    view: Option<ByteView>,
    expire: Expiry,
}

impl ViewSink {
    pub(crate) fn new() -> Self {
        ViewSink::default()
    }

    pub(crate) fn into_parts(self) -> CacheResult<(ByteView, Expiry)> {
        let view = self.view.ok_or_else(unpopulated)?;
        Ok((view, self.expire))
    }
}

impl Sink for ViewSink {
    fn set_string(&mut self, value: &str, expire: Expiry) -> CacheResult<()> {
        self.view = Some(ByteView::from(value));
        self.expire = expire;
        Ok(())
    }

    fn set_bytes(&mut self, value: &[u8], expire: Expiry) -> CacheResult<()> {
        self.view = Some(ByteView::copy_from(value));
        self.expire = expire;
        Ok(())
    }

    fn set_view(&mut self, view: ByteView, expire: Expiry) -> CacheResult<()> {
        self.view = Some(view);
        self.expire = expire;
        Ok(())
    }

    fn view(&self) -> CacheResult<ByteView> {
        self.view.clone().ok_or_else(unpopulated)
    }
}
