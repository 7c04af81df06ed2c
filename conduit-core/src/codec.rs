//! Record serialization boundary used by backends that exchange records.
//!
//! A [`RecordCodec`] is the pluggable, schema-bound reader/writer pair. The
//! [`RecordSerializer`] and [`RecordDeserializer`] wrap a codec with stream
//! lifecycle (`open`, per-record calls, `close`) and length-prefixed framing.
//!
//! # Wire Format
//!
//! Each record is a 4-byte big-endian length followed by the codec's bytes.
//! A stream that ends exactly on a record boundary is a clean end of input.

use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CodecError;

/// Upper bound on a single framed record.
pub const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// Schema-bound encoder/decoder for one record type.
pub trait RecordCodec<T> {
    /// Name of the schema this codec reads and writes.
    fn schema_name(&self) -> &str;

    /// Append the encoding of `record` to `out`.
    fn write_record(&self, record: &T, out: &mut Vec<u8>) -> Result<(), CodecError>;

    /// Decode one record from exactly `bytes`.
    fn read_record(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Hands out serializers and deserializers sharing one codec.
#[derive(Debug)]
pub struct RecordSerialization<C> {
    codec: Arc<C>,
}

impl<C> Clone for RecordSerialization<C> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<C> RecordSerialization<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec: Arc::new(codec),
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn serializer<T, W>(&self) -> RecordSerializer<T, C, W>
    where
        C: RecordCodec<T>,
        W: Write,
    {
        RecordSerializer {
            codec: Arc::clone(&self.codec),
            out: None,
            buf: Vec::new(),
            _record: PhantomData,
        }
    }

    pub fn deserializer<T, R>(&self) -> RecordDeserializer<T, C, R>
    where
        C: RecordCodec<T>,
        R: Read,
    {
        RecordDeserializer {
            codec: Arc::clone(&self.codec),
            input: None,
            buf: Vec::new(),
            _record: PhantomData,
        }
    }
}

/// Write side: `open`, then `serialize` per record, then `close`.
pub struct RecordSerializer<T, C, W> {
    codec: Arc<C>,
    out: Option<W>,
    buf: Vec<u8>,
    _record: PhantomData<fn(&T)>,
}

impl<T, C, W> RecordSerializer<T, C, W>
where
    C: RecordCodec<T>,
    W: Write,
{
    /// Bind the serializer to an output stream.
    pub fn open(&mut self, out: W) {
        self.out = Some(out);
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    /// Encode and frame one record.
    pub fn serialize(&mut self, record: &T) -> Result<(), CodecError> {
        let out = self.out.as_mut().ok_or(CodecError::NotOpen)?;

        self.buf.clear();
        self.codec.write_record(record, &mut self.buf)?;
        let len = u32::try_from(self.buf.len())
            .ok()
            .filter(|len| (*len as usize) <= MAX_RECORD_LEN)
            .ok_or_else(|| CodecError::Encode {
                schema: self.codec.schema_name().to_string(),
                reason: format!("record of {} bytes exceeds frame limit", self.buf.len()),
            })?;

        out.write_all(&len.to_be_bytes())?;
        out.write_all(&self.buf)?;
        Ok(())
    }

    /// Flush and release the output stream, returning it.
    pub fn close(&mut self) -> Result<W, CodecError> {
        let mut out = self.out.take().ok_or(CodecError::NotOpen)?;
        out.flush()?;
        Ok(out)
    }
}

/// Read side: `open`, then `deserialize` until `None`, then `close`.
pub struct RecordDeserializer<T, C, R> {
    codec: Arc<C>,
    input: Option<R>,
    buf: Vec<u8>,
    _record: PhantomData<fn() -> T>,
}

impl<T, C, R> RecordDeserializer<T, C, R>
where
    C: RecordCodec<T>,
    R: Read,
{
    /// Bind the deserializer to an input stream.
    pub fn open(&mut self, input: R) {
        self.input = Some(input);
    }

    pub fn is_open(&self) -> bool {
        self.input.is_some()
    }

    /// Read the next record, or `None` at a clean end of stream.
    pub fn deserialize(&mut self) -> Result<Option<T>, CodecError> {
        let input = self.input.as_mut().ok_or(CodecError::NotOpen)?;

        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match input.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(CodecError::Io {
                        reason: "stream ended inside a record header".to_string(),
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_RECORD_LEN {
            return Err(CodecError::Decode {
                schema: self.codec.schema_name().to_string(),
                reason: format!("frame of {} bytes exceeds limit", len),
            });
        }

        self.buf.resize(len, 0);
        input.read_exact(&mut self.buf)?;
        self.codec.read_record(&self.buf).map(Some)
    }

    /// Release the input stream, returning it.
    pub fn close(&mut self) -> Result<R, CodecError> {
        self.input.take().ok_or(CodecError::NotOpen)
    }
}

/// JSON codec for any serde type, labelled with a schema name.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    schema: String,
}

impl JsonCodec {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }
}

impl<T> RecordCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn schema_name(&self) -> &str {
        &self.schema
    }

    fn write_record(&self, record: &T, out: &mut Vec<u8>) -> Result<(), CodecError> {
        serde_json::to_writer(out, record).map_err(|e| CodecError::Encode {
            schema: self.schema.clone(),
            reason: e.to_string(),
        })
    }

    fn read_record(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            schema: self.schema.clone(),
            reason: e.to_string(),
        })
    }
}
