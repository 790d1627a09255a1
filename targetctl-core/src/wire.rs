//! Marshalling for the subset of the D-Bus wire format the service manager
//! speaks to us: basic scalars, strings, object paths and (nested) arrays.
//!
//! Decoding is signature driven. [`decode`] dispatches on a parsed [`Type`]
//! and reads from a [`MessageReader`] cursor; arrays are read element by
//! element until the cursor reports that nothing more is present.
//!
//! The only variant the reader understands is the envelope around a property
//! value (`org.freedesktop.DBus.Properties.Get` returns `v`), which is entered
//! with [`MessageReader::enter_variant`] against the expected inner type.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

/// Arrays longer than this are rejected, matching the bus limit.
pub const MAX_ARRAY_LEN: usize = 64 * 1024 * 1024;

const MAX_NESTING: usize = 32;

/// Byte order of a message body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    /// Parse the byte-order flag from a message header (`l` or `B`).
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            b'l' => Some(Endian::Little),
            b'B' => Some(Endian::Big),
            _ => None,
        }
    }
}

/// One complete type from a signature string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    String,
    ObjectPath,
    Byte,
    Boolean,
    Int16,
    Uint16,
    Uint32,
    Int64,
    Uint64,
    Double,
    Array(Box<Type>),
    /// Only valid as the envelope of a property value.
    Variant,
}

impl Type {
    /// Shorthand for `a` + `element`.
    pub fn array(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Parse exactly one complete type.
    pub fn parse(signature: &str) -> Result<Type, DecodeError> {
        let mut types = Self::parse_all(signature)?;
        if types.len() != 1 {
            return Err(DecodeError::InvalidSignature {
                signature: signature.to_string(),
                reason: "expected exactly one complete type",
            });
        }
        Ok(types.remove(0))
    }

    /// Parse a signature into its sequence of complete types.
    pub fn parse_all(signature: &str) -> Result<Vec<Type>, DecodeError> {
        let bytes = signature.as_bytes();
        if bytes.len() > 255 {
            return Err(DecodeError::InvalidSignature {
                signature: signature.to_string(),
                reason: "signature longer than 255 bytes",
            });
        }
        let mut pos = 0;
        let mut types = Vec::new();
        while pos < bytes.len() {
            types.push(Self::parse_one(signature, &mut pos, 0)?);
        }
        Ok(types)
    }

    fn parse_one(signature: &str, pos: &mut usize, depth: usize) -> Result<Type, DecodeError> {
        let invalid = |reason| DecodeError::InvalidSignature {
            signature: signature.to_string(),
            reason,
        };
        if depth > MAX_NESTING {
            return Err(invalid("arrays nested too deeply"));
        }
        let Some(&code) = signature.as_bytes().get(*pos) else {
            return Err(invalid("array is missing its element type"));
        };
        *pos += 1;
        let ty = match code {
            b's' => Type::String,
            b'o' => Type::ObjectPath,
            b'y' => Type::Byte,
            b'b' => Type::Boolean,
            b'n' => Type::Int16,
            b'q' => Type::Uint16,
            b'u' => Type::Uint32,
            b'x' => Type::Int64,
            b't' => Type::Uint64,
            b'd' => Type::Double,
            b'v' => Type::Variant,
            b'a' => Type::array(Self::parse_one(signature, pos, depth + 1)?),
            _ => return Err(invalid("unsupported type code")),
        };
        Ok(ty)
    }

    /// The leading type code.
    pub fn code(&self) -> char {
        match self {
            Type::String => 's',
            Type::ObjectPath => 'o',
            Type::Byte => 'y',
            Type::Boolean => 'b',
            Type::Int16 => 'n',
            Type::Uint16 => 'q',
            Type::Uint32 => 'u',
            Type::Int64 => 'x',
            Type::Uint64 => 't',
            Type::Double => 'd',
            Type::Array(_) => 'a',
            Type::Variant => 'v',
        }
    }

    /// Alignment in bytes, relative to the start of the body.
    pub fn alignment(&self) -> usize {
        match self {
            Type::Byte | Type::Variant => 1,
            Type::Int16 | Type::Uint16 => 2,
            Type::Boolean | Type::Uint32 | Type::String | Type::ObjectPath | Type::Array(_) => 4,
            Type::Int64 | Type::Uint64 | Type::Double => 8,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Array(element) => write!(f, "a{}", element),
            other => write!(f, "{}", other.code()),
        }
    }
}

impl FromStr for Type {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Type::parse(s)
    }
}

/// A decoded value. Array elements all share one type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    ObjectPath(String),
    Byte(u8),
    Bool(bool),
    Int16(i16),
    Uint16(u16),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Value::String(s) | Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Consume an `as`/`ao` value into its strings.
    pub fn into_strings(self) -> Option<Vec<String>> {
        self.into_array()?
            .into_iter()
            .map(Value::into_string)
            .collect()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// A message body together with its signature and byte order.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Payload {
    pub signature: String,
    pub endian: Endian,
    pub body: Vec<u8>,
}

impl Payload {
    pub fn reader(&self) -> Result<MessageReader<'_>, DecodeError> {
        MessageReader::new(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid signature '{signature}': {reason}")]
    InvalidSignature {
        signature: String,
        reason: &'static str,
    },
    #[error("expected '{expected}' but the payload holds '{found}'")]
    SignatureMismatch { expected: String, found: String },
    #[error("failed to read '{code}' at offset {offset}: {reason}")]
    Read {
        code: char,
        offset: usize,
        reason: String,
    },
    #[error("container framing error: {0}")]
    Framing(String),
    #[error("'{code}' cannot be decoded as a value")]
    Unsupported { code: char },
    #[error("payload has no '{0}' left to read")]
    Exhausted(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("value does not match type '{0}'")]
    TypeMismatch(String),
    #[error("string contains an interior NUL byte")]
    InteriorNul,
    #[error("array of {0} bytes exceeds the maximum length")]
    ArrayTooLong(usize),
}

enum Frame {
    Array { element: Type, end: usize },
    Variant { ty: Type, done: bool },
}

/// Cursor over a reply body.
///
/// Reads report `Ok(None)` when the enclosing container (or the body) has no
/// further value, which is how array loops find their end.
pub struct MessageReader<'a> {
    body: &'a [u8],
    endian: Endian,
    pos: usize,
    signature: Vec<Type>,
    next_top: usize,
    frames: Vec<Frame>,
}

impl<'a> MessageReader<'a> {
    pub fn new(payload: &'a Payload) -> Result<Self, DecodeError> {
        Ok(Self {
            body: &payload.body,
            endian: payload.endian,
            pos: 0,
            signature: Type::parse_all(&payload.signature)?,
            next_top: 0,
            frames: Vec::new(),
        })
    }

    /// Number of containers currently entered.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    /// True once every top-level value has been consumed.
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty() && self.next_top >= self.signature.len()
    }

    /// Read one scalar of type `ty`.
    pub fn read_basic(&mut self, ty: &Type) -> Result<Option<Value>, DecodeError> {
        if matches!(ty, Type::Array(_) | Type::Variant) {
            return Err(DecodeError::Framing(format!(
                "'{}' is a container, not a basic type",
                ty
            )));
        }
        if !self.begin(ty)? {
            return Ok(None);
        }
        let code = ty.code();
        self.align(ty.alignment(), code)?;
        let value = match ty {
            Type::Byte => Value::Byte(self.fixed::<1>(code)?[0]),
            Type::Boolean => {
                let offset = self.pos;
                match self.u32(code)? {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    other => {
                        return Err(DecodeError::Read {
                            code,
                            offset,
                            reason: format!("invalid boolean value {}", other),
                        });
                    }
                }
            }
            Type::Int16 => Value::Int16(self.u16(code)? as i16),
            Type::Uint16 => Value::Uint16(self.u16(code)?),
            Type::Uint32 => Value::Uint32(self.u32(code)?),
            Type::Int64 => Value::Int64(self.u64(code)? as i64),
            Type::Uint64 => Value::Uint64(self.u64(code)?),
            Type::Double => Value::Double(f64::from_bits(self.u64(code)?)),
            Type::String => Value::String(self.string(code)?),
            Type::ObjectPath => Value::ObjectPath(self.string(code)?),
            Type::Array(_) | Type::Variant => unreachable!("containers rejected above"),
        };
        Ok(Some(value))
    }

    /// Enter an array of `element`. Returns `None` when no array is present at
    /// this position.
    pub fn enter_array(
        &mut self,
        element: &Type,
    ) -> Result<Option<ContainerGuard<'_, 'a>>, DecodeError> {
        if !self.begin(&Type::array(element.clone()))? {
            return Ok(None);
        }
        self.align(4, 'a')?;
        let len = self.u32('a')? as usize;
        if len > MAX_ARRAY_LEN {
            return Err(DecodeError::Framing(format!(
                "array length {} exceeds maximum",
                len
            )));
        }
        self.align(element.alignment(), 'a')?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.limit())
            .ok_or_else(|| {
                DecodeError::Framing(format!(
                    "array of {} bytes at offset {} overruns its container",
                    len, self.pos
                ))
            })?;
        self.frames.push(Frame::Array {
            element: element.clone(),
            end,
        });
        Ok(Some(ContainerGuard::new(self)))
    }

    /// Enter a variant whose contained type must be `expected`.
    pub fn enter_variant(
        &mut self,
        expected: &Type,
    ) -> Result<Option<ContainerGuard<'_, 'a>>, DecodeError> {
        if !self.begin(&Type::Variant)? {
            return Ok(None);
        }
        let signature = self.signature_string('v')?;
        let inner = Type::parse(&signature)?;
        if &inner != expected {
            return Err(DecodeError::SignatureMismatch {
                expected: expected.to_string(),
                found: signature,
            });
        }
        self.frames.push(Frame::Variant {
            ty: inner,
            done: false,
        });
        Ok(Some(ContainerGuard::new(self)))
    }

    /// Claim the next slot for a value of type `ty`, checking it against the
    /// signature. `false` means nothing is left in the current container.
    fn begin(&mut self, ty: &Type) -> Result<bool, DecodeError> {
        let expected = match self.frames.last_mut() {
            Some(Frame::Array { element, end }) => {
                if self.pos >= *end {
                    return Ok(false);
                }
                element.clone()
            }
            Some(Frame::Variant { ty: inner, done }) => {
                if *done {
                    return Ok(false);
                }
                *done = true;
                inner.clone()
            }
            None => {
                let Some(next) = self.signature.get(self.next_top) else {
                    return Ok(false);
                };
                self.next_top += 1;
                next.clone()
            }
        };
        if &expected != ty {
            return Err(DecodeError::SignatureMismatch {
                expected: ty.to_string(),
                found: expected.to_string(),
            });
        }
        Ok(true)
    }

    fn exit_container(&mut self) -> Result<(), DecodeError> {
        match self.frames.pop() {
            Some(Frame::Array { end, .. }) if self.pos == end => Ok(()),
            Some(Frame::Array { end, .. }) => {
                let unread = end.saturating_sub(self.pos);
                self.pos = end;
                Err(DecodeError::Framing(format!(
                    "array closed with {} unread bytes",
                    unread
                )))
            }
            Some(Frame::Variant { done: true, .. }) => Ok(()),
            Some(Frame::Variant { ty, .. }) => Err(DecodeError::Framing(format!(
                "variant closed before its '{}' value was read",
                ty
            ))),
            None => Err(DecodeError::Framing("no container to exit".to_string())),
        }
    }

    /// Leave the innermost container without validation, skipping whatever
    /// was not read so the outer cursor stays consistent.
    fn abandon_container(&mut self) {
        if let Some(Frame::Array { end, .. }) = self.frames.pop() {
            self.pos = end.max(self.pos);
        }
    }

    fn limit(&self) -> usize {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| match frame {
                Frame::Array { end, .. } => Some(*end),
                Frame::Variant { .. } => None,
            })
            .unwrap_or(self.body.len())
    }

    fn truncated(&self, code: char, wanted: usize) -> DecodeError {
        DecodeError::Read {
            code,
            offset: self.pos,
            reason: format!(
                "payload truncated, {} bytes wanted but {} available",
                wanted,
                self.limit().saturating_sub(self.pos)
            ),
        }
    }

    fn align(&mut self, alignment: usize, code: char) -> Result<(), DecodeError> {
        let padded = self.pos.div_ceil(alignment) * alignment;
        if padded > self.limit() {
            return Err(self.truncated(code, padded - self.pos));
        }
        if self.body[self.pos..padded].iter().any(|b| *b != 0) {
            return Err(DecodeError::Read {
                code,
                offset: self.pos,
                reason: "non-zero alignment padding".to_string(),
            });
        }
        self.pos = padded;
        Ok(())
    }

    fn take(&mut self, len: usize, code: char) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.limit())
            .ok_or_else(|| self.truncated(code, len))?;
        let body: &'a [u8] = self.body;
        let bytes = &body[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn fixed<const N: usize>(&mut self, code: char) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, code)?);
        Ok(out)
    }

    fn u16(&mut self, code: char) -> Result<u16, DecodeError> {
        let bytes = self.fixed::<2>(code)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32(&mut self, code: char) -> Result<u32, DecodeError> {
        let bytes = self.fixed::<4>(code)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    fn u64(&mut self, code: char) -> Result<u64, DecodeError> {
        let bytes = self.fixed::<8>(code)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    fn string(&mut self, code: char) -> Result<String, DecodeError> {
        let len = self.u32(code)? as usize;
        self.text(len, code)
    }

    fn signature_string(&mut self, code: char) -> Result<String, DecodeError> {
        let len = self.fixed::<1>(code)?[0] as usize;
        self.text(len, code)
    }

    fn text(&mut self, len: usize, code: char) -> Result<String, DecodeError> {
        let offset = self.pos;
        let bytes = self.take(len, code)?;
        let nul = self.fixed::<1>(code)?[0];
        if nul != 0 {
            return Err(DecodeError::Read {
                code,
                offset,
                reason: "string is not NUL terminated".to_string(),
            });
        }
        String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::Read {
            code,
            offset,
            reason: format!("invalid UTF-8: {}", e),
        })
    }
}

/// Scope of one entered container. Dropping the guard leaves the container
/// even if decoding inside it failed; [`ContainerGuard::exit`] additionally
/// checks that the container was consumed exactly.
pub struct ContainerGuard<'r, 'a> {
    reader: &'r mut MessageReader<'a>,
    open: bool,
}

impl<'r, 'a> ContainerGuard<'r, 'a> {
    fn new(reader: &'r mut MessageReader<'a>) -> Self {
        Self { reader, open: true }
    }

    pub fn exit(mut self) -> Result<(), DecodeError> {
        self.open = false;
        self.reader.exit_container()
    }
}

impl<'a> Deref for ContainerGuard<'_, 'a> {
    type Target = MessageReader<'a>;

    fn deref(&self) -> &Self::Target {
        self.reader
    }
}

impl DerefMut for ContainerGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.reader
    }
}

impl Drop for ContainerGuard<'_, '_> {
    fn drop(&mut self) {
        if self.open {
            self.reader.abandon_container();
        }
    }
}

/// Decode one value of type `ty`. An exhausted cursor is an error here.
pub fn decode(ty: &Type, reader: &mut MessageReader<'_>) -> Result<Value, DecodeError> {
    decode_next(ty, reader)?.ok_or_else(|| DecodeError::Exhausted(ty.to_string()))
}

/// Decode one value of type `ty`, or `None` if the current container has no
/// further value.
pub fn decode_next(ty: &Type, reader: &mut MessageReader<'_>) -> Result<Option<Value>, DecodeError> {
    match ty {
        Type::Array(element) => {
            let Some(mut scope) = reader.enter_array(element)? else {
                return Ok(None);
            };
            let mut items = Vec::new();
            while let Some(item) = decode_next(element, &mut scope)? {
                items.push(item);
            }
            scope.exit()?;
            Ok(Some(Value::Array(items)))
        }
        Type::Variant => Err(DecodeError::Unsupported { code: 'v' }),
        basic => reader.read_basic(basic),
    }
}

/// Builds a little-endian message body.
#[derive(Debug, Default)]
pub struct MessageWriter {
    body: Vec<u8>,
    signature: String,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value`, which must match `ty`. On error nothing is appended.
    pub fn write(&mut self, ty: &Type, value: &Value) -> Result<&mut Self, EncodeError> {
        let start = self.body.len();
        self.put(ty, value).inspect_err(|_| self.body.truncate(start))?;
        self.signature.push_str(&ty.to_string());
        Ok(self)
    }

    /// Append `value` wrapped in a variant. On error nothing is appended.
    pub fn write_variant(&mut self, ty: &Type, value: &Value) -> Result<&mut Self, EncodeError> {
        let start = self.body.len();
        let inner = ty.to_string();
        self.body.push(inner.len() as u8);
        self.body.extend_from_slice(inner.as_bytes());
        self.body.push(0);
        self.put(ty, value).inspect_err(|_| self.body.truncate(start))?;
        self.signature.push('v');
        Ok(self)
    }

    pub fn finish(self) -> Payload {
        Payload {
            signature: self.signature,
            endian: Endian::Little,
            body: self.body,
        }
    }

    fn pad(&mut self, alignment: usize) {
        let padded = self.body.len().div_ceil(alignment) * alignment;
        self.body.resize(padded, 0);
    }

    fn put_fixed(&mut self, alignment: usize, bytes: &[u8]) {
        self.pad(alignment);
        self.body.extend_from_slice(bytes);
    }

    fn put(&mut self, ty: &Type, value: &Value) -> Result<(), EncodeError> {
        match (ty, value) {
            (Type::Byte, Value::Byte(v)) => self.body.push(*v),
            (Type::Boolean, Value::Bool(v)) => self.put_fixed(4, &u32::from(*v).to_le_bytes()),
            (Type::Int16, Value::Int16(v)) => self.put_fixed(2, &v.to_le_bytes()),
            (Type::Uint16, Value::Uint16(v)) => self.put_fixed(2, &v.to_le_bytes()),
            (Type::Uint32, Value::Uint32(v)) => self.put_fixed(4, &v.to_le_bytes()),
            (Type::Int64, Value::Int64(v)) => self.put_fixed(8, &v.to_le_bytes()),
            (Type::Uint64, Value::Uint64(v)) => self.put_fixed(8, &v.to_le_bytes()),
            (Type::Double, Value::Double(v)) => self.put_fixed(8, &v.to_bits().to_le_bytes()),
            (Type::String, Value::String(s)) | (Type::ObjectPath, Value::ObjectPath(s)) => {
                if s.as_bytes().contains(&0) {
                    return Err(EncodeError::InteriorNul);
                }
                self.put_fixed(4, &(s.len() as u32).to_le_bytes());
                self.body.extend_from_slice(s.as_bytes());
                self.body.push(0);
            }
            (Type::Array(element), Value::Array(items)) => {
                self.pad(4);
                let len_at = self.body.len();
                self.body.extend_from_slice(&[0; 4]);
                self.pad(element.alignment());
                let start = self.body.len();
                for item in items {
                    self.put(element, item)?;
                }
                let len = self.body.len() - start;
                if len > MAX_ARRAY_LEN {
                    return Err(EncodeError::ArrayTooLong(len));
                }
                self.body[len_at..len_at + 4].copy_from_slice(&(len as u32).to_le_bytes());
            }
            _ => return Err(EncodeError::TypeMismatch(ty.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(ty: &Type, value: &Value) -> Payload {
        let mut writer = MessageWriter::new();
        writer.write(ty, value).unwrap();
        writer.finish()
    }

    #[test]
    fn test_scalars_survive_encode_and_decode() {
        let cases = [
            (Type::String, Value::from("sshd.service")),
            (
                Type::ObjectPath,
                Value::ObjectPath("/org/freedesktop/systemd1/unit/sshd_2eservice".into()),
            ),
            (Type::Byte, Value::Byte(0xfe)),
            (Type::Boolean, Value::Bool(true)),
            (Type::Int16, Value::Int16(-12_345)),
            (Type::Uint16, Value::Uint16(54_321)),
            (Type::Uint32, Value::Uint32(u32::MAX - 7)),
            (Type::Int64, Value::Int64(i64::MIN + 3)),
            (Type::Uint64, Value::Uint64(1_700_000_000_123_456)),
            (Type::Double, Value::Double(-0.1)),
        ];

        // All values share one body so alignment between fields is exercised.
        let mut writer = MessageWriter::new();
        for (ty, value) in &cases {
            writer.write(ty, value).unwrap();
        }
        let payload = writer.finish();
        assert_eq!(payload.signature, "soybnquxtd");

        let mut reader = payload.reader().unwrap();
        for (ty, value) in &cases {
            assert_eq!(&decode(ty, &mut reader).unwrap(), value);
        }
        assert!(reader.is_finished());
        assert_eq!(reader.offset(), payload.body.len());
    }

    #[test]
    fn test_double_is_bit_exact() {
        let nan = f64::from_bits(0x7ff8_0000_dead_beef);
        let payload = single(&Type::Double, &Value::Double(nan));
        let mut reader = payload.reader().unwrap();
        match decode(&Type::Double, &mut reader).unwrap() {
            Value::Double(v) => assert_eq!(v.to_bits(), nan.to_bits()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_array_keeps_order() {
        let names: Vec<Value> = ["c.service", "a.service", "b.target"]
            .into_iter()
            .map(Value::from)
            .collect();
        let ty = Type::array(Type::String);
        let payload = single(&ty, &Value::Array(names.clone()));

        let mut reader = payload.reader().unwrap();
        let decoded = decode(&ty, &mut reader).unwrap();
        assert_eq!(decoded, Value::Array(names));
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    fn test_empty_array_decodes_to_nothing() {
        let ty = Type::array(Type::String);
        let payload = single(&ty, &Value::Array(vec![]));
        assert_eq!(payload.body, vec![0, 0, 0, 0]);

        let mut reader = payload.reader().unwrap();
        assert_eq!(decode(&ty, &mut reader).unwrap(), Value::Array(vec![]));
        assert!(reader.is_finished());
    }

    #[test]
    fn test_empty_array_of_u64_keeps_element_padding() {
        let ty = Type::array(Type::Uint64);
        let payload = single(&ty, &Value::Array(vec![]));
        // length word, then padding up to the 8-byte element boundary
        assert_eq!(payload.body.len(), 8);

        let mut reader = payload.reader().unwrap();
        assert_eq!(decode(&ty, &mut reader).unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn test_nested_arrays() {
        let ty: Type = "aas".parse().unwrap();
        let value = Value::Array(vec![
            Value::Array(vec![Value::from("a"), Value::from("b")]),
            Value::Array(vec![]),
            Value::Array(vec![Value::from("c")]),
        ]);
        let payload = single(&ty, &value);

        let mut reader = payload.reader().unwrap();
        assert_eq!(decode(&ty, &mut reader).unwrap(), value);
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    fn test_big_endian_body() {
        let payload = Payload {
            signature: "qt".into(),
            endian: Endian::Big,
            body: vec![0x12, 0x34, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x02],
        };
        let mut reader = payload.reader().unwrap();
        assert_eq!(decode(&Type::Uint16, &mut reader).unwrap(), Value::Uint16(0x1234));
        assert_eq!(decode(&Type::Uint64, &mut reader).unwrap(), Value::Uint64(0x0102));
    }

    #[test]
    fn test_exhausted_body_is_not_present() {
        let payload = single(&Type::Uint32, &Value::Uint32(7));
        let mut reader = payload.reader().unwrap();
        assert_eq!(reader.read_basic(&Type::Uint32).unwrap(), Some(Value::Uint32(7)));
        assert_eq!(reader.read_basic(&Type::Uint32).unwrap(), None);
        assert_eq!(
            decode(&Type::Uint32, &mut reader),
            Err(DecodeError::Exhausted("u".into()))
        );
    }

    #[test]
    fn test_signature_mismatch() {
        let payload = single(&Type::String, &Value::from("active"));
        let mut reader = payload.reader().unwrap();
        let err = decode(&Type::Uint64, &mut reader).unwrap_err();
        assert_eq!(
            err,
            DecodeError::SignatureMismatch {
                expected: "t".into(),
                found: "s".into(),
            }
        );
    }

    #[test]
    fn test_truncated_string_is_a_read_error() {
        let payload = Payload {
            signature: "s".into(),
            endian: Endian::Little,
            body: vec![10, 0, 0, 0, b'a', b'b'],
        };
        let mut reader = payload.reader().unwrap();
        let err = decode(&Type::String, &mut reader).unwrap_err();
        assert!(matches!(err, DecodeError::Read { code: 's', .. }), "{:?}", err);
    }

    #[test]
    fn test_invalid_boolean() {
        let payload = Payload {
            signature: "b".into(),
            endian: Endian::Little,
            body: vec![2, 0, 0, 0],
        };
        let mut reader = payload.reader().unwrap();
        let err = decode(&Type::Boolean, &mut reader).unwrap_err();
        assert!(err.to_string().contains("invalid boolean value 2"));
    }

    #[test]
    fn test_container_is_left_when_an_element_fails() {
        // "as" holding one string whose length runs past the array end.
        let payload = Payload {
            signature: "as".into(),
            endian: Endian::Little,
            body: vec![8, 0, 0, 0, 9, 0, 0, 0, b'x', b'y', b'z', 0],
        };
        let mut reader = payload.reader().unwrap();
        let err = decode(&Type::array(Type::String), &mut reader).unwrap_err();
        assert!(matches!(err, DecodeError::Read { .. }));
        assert_eq!(reader.depth(), 0);
        assert_eq!(reader.offset(), 12);
    }

    #[test]
    fn test_array_overrunning_body_fails_to_open() {
        let payload = Payload {
            signature: "as".into(),
            endian: Endian::Little,
            body: vec![64, 0, 0, 0, 1, 0, 0, 0],
        };
        let mut reader = payload.reader().unwrap();
        let err = decode(&Type::array(Type::String), &mut reader).unwrap_err();
        assert!(matches!(err, DecodeError::Framing(_)));
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    fn test_variant_envelope() {
        let mut writer = MessageWriter::new();
        writer
            .write_variant(&Type::String, &Value::from("inactive"))
            .unwrap();
        let payload = writer.finish();
        assert_eq!(payload.signature, "v");

        let mut reader = payload.reader().unwrap();
        let mut scope = reader.enter_variant(&Type::String).unwrap().unwrap();
        assert_eq!(
            decode(&Type::String, &mut scope).unwrap(),
            Value::from("inactive")
        );
        scope.exit().unwrap();
        assert!(reader.is_finished());

        let mut reader = payload.reader().unwrap();
        let err = reader.enter_variant(&Type::Uint64).err().unwrap();
        assert!(matches!(err, DecodeError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_signature_parsing() {
        assert_eq!(Type::parse("as").unwrap(), Type::array(Type::String));
        assert_eq!(Type::parse_all("ss").unwrap().len(), 2);
        assert!(Type::parse("a").is_err());
        assert!(Type::parse("(ss)").is_err());
        assert!(Type::parse("ss").is_err());
        assert!(Type::parse(&format!("{}s", "a".repeat(40))).is_err());
        assert_eq!(Type::array(Type::array(Type::Uint64)).to_string(), "aat");
    }

    #[test]
    fn test_writer_rejects_mismatched_value() {
        let mut writer = MessageWriter::new();
        assert_eq!(
            writer.write(&Type::Uint32, &Value::from("x")).err(),
            Some(EncodeError::TypeMismatch("u".into()))
        );
        assert_eq!(
            writer.write(&Type::String, &Value::from("a\0b")).err(),
            Some(EncodeError::InteriorNul)
        );
    }

    #[test]
    fn test_failed_write_leaves_writer_untouched() {
        let mut writer = MessageWriter::new();
        writer.write(&Type::String, &Value::from("ok")).unwrap();
        let before = writer.body.len();

        let bad = Value::Array(vec![Value::from("a"), Value::Uint32(1)]);
        assert!(writer.write(&Type::array(Type::String), &bad).is_err());
        assert!(writer.write_variant(&Type::array(Type::String), &bad).is_err());
        assert_eq!(writer.body.len(), before);

        let payload = writer.finish();
        assert_eq!(payload.signature, "s");
        let mut reader = payload.reader().unwrap();
        assert_eq!(decode(&Type::String, &mut reader).unwrap(), Value::from("ok"));
        assert!(reader.is_finished());
    }
}
