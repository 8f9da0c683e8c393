//! Typed application samples.
//!
//! A typed sample is a data-sample payload of the form
//! `[type id: u16 LE][serde_json body]`. The sending side declares the types it
//! will emit on a [`SampleEncoder`]; the receiving side registers one handler
//! per type on a [`SampleRegistry`] and dispatches incoming payloads to it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FrameError, Result};

/// Identifies the type of a typed sample.
pub type SampleTypeId = u16;

const TYPE_TAG_SIZE: usize = 2;

/// Encode one typed sample payload.
pub fn encode_sample<T: Serialize>(type_id: SampleTypeId, value: &T) -> Result<Bytes> {
    let body = serde_json::to_vec(value)?;
    let mut dst = BytesMut::with_capacity(TYPE_TAG_SIZE + body.len());
    dst.put_u16_le(type_id);
    dst.put_slice(&body);
    Ok(dst.freeze())
}

/// Split a typed sample payload into its type id and body.
pub fn split_sample(payload: &[u8]) -> Result<(SampleTypeId, &[u8])> {
    if payload.len() < TYPE_TAG_SIZE {
        return Err(FrameError::Malformed {
            kind: "typed_sample",
            reason: format!("payload of {} bytes has no type tag", payload.len()),
        });
    }
    let type_id = u16::from_le_bytes([payload[0], payload[1]]);
    Ok((type_id, &payload[TYPE_TAG_SIZE..]))
}

/// Output side of a typed sample stream.
///
/// Types must be declared before they are encoded, so a sender cannot emit a
/// sample the application never agreed to produce.
#[derive(Debug, Clone, Default)]
pub struct SampleEncoder {
    declared: BTreeSet<SampleTypeId>,
}

impl SampleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type id this encoder may emit. Returns `false` if already declared.
    pub fn declare(&mut self, type_id: SampleTypeId) -> bool {
        self.declared.insert(type_id)
    }

    pub fn is_declared(&self, type_id: SampleTypeId) -> bool {
        self.declared.contains(&type_id)
    }

    /// Encode a value of a declared type.
    pub fn encode<T: Serialize>(&self, type_id: SampleTypeId, value: &T) -> Result<Bytes> {
        if !self.is_declared(type_id) {
            return Err(FrameError::UnknownSampleType(type_id));
        }
        encode_sample(type_id, value)
    }
}

type Handler = Box<dyn FnMut(&[u8]) -> Result<()> + Send>;

/// A handler taken out of its registry so it can run while the registry is
/// free to be modified. Hand it back with [`SampleRegistry::restore`].
pub struct CheckedOut {
    type_id: SampleTypeId,
    handler: Handler,
}

impl CheckedOut {
    pub fn type_id(&self) -> SampleTypeId {
        self.type_id
    }

    /// Decode `payload`'s body and run the handler on it.
    pub fn run(&mut self, payload: &[u8]) -> Result<()> {
        let (_, body) = split_sample(payload)?;
        (self.handler)(body)
    }
}

impl fmt::Debug for CheckedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckedOut")
            .field("type_id", &self.type_id)
            .finish()
    }
}

/// Input side of a typed sample stream: per-type decode-and-dispatch.
#[derive(Default)]
pub struct SampleRegistry {
    handlers: HashMap<SampleTypeId, Handler>,
    /// Types whose handler is checked out and still expected back.
    running: BTreeSet<SampleTypeId>,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for one sample type, replacing any previous one.
    pub fn register<T, F>(&mut self, type_id: SampleTypeId, mut handler: F)
    where
        T: DeserializeOwned,
        F: FnMut(T) + Send + 'static,
    {
        self.running.remove(&type_id);
        self.handlers.insert(
            type_id,
            Box::new(move |body: &[u8]| {
                let value: T = serde_json::from_slice(body)?;
                handler(value);
                Ok(())
            }),
        );
    }

    /// Remove the handler for a type. Returns whether one was registered.
    pub fn unregister(&mut self, type_id: SampleTypeId) -> bool {
        let running = self.running.remove(&type_id);
        self.handlers.remove(&type_id).is_some() || running
    }

    pub fn is_registered(&self, type_id: SampleTypeId) -> bool {
        self.handlers.contains_key(&type_id) || self.running.contains(&type_id)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.running.is_empty()
    }

    /// Take out the handler for `payload`'s type.
    pub fn checkout(&mut self, payload: &[u8]) -> Result<CheckedOut> {
        let (type_id, _) = split_sample(payload)?;
        let handler = self
            .handlers
            .remove(&type_id)
            .ok_or(FrameError::UnknownSampleType(type_id))?;
        self.running.insert(type_id);
        Ok(CheckedOut { type_id, handler })
    }

    /// Put a checked-out handler back, unless its type was registered again
    /// or unregistered while it ran.
    pub fn restore(&mut self, checked_out: CheckedOut) {
        if self.running.remove(&checked_out.type_id) {
            self.handlers
                .insert(checked_out.type_id, checked_out.handler);
        }
    }

    /// Decode a typed sample payload and hand it to its handler.
    ///
    /// Returns the type id that was dispatched.
    pub fn dispatch(&mut self, payload: &[u8]) -> Result<SampleTypeId> {
        let mut handler = self.checkout(payload)?;
        let result = handler.run(payload);
        let type_id = handler.type_id();
        self.restore(handler);
        result.map(|()| type_id)
    }
}

impl fmt::Debug for SampleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        f.debug_struct("SampleRegistry")
            .field("types", &types)
            .finish()
    }
}
