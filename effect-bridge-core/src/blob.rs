//! The flat, versioned registration blob.
//!
//! Layout, in order, with no padding and nothing allowed after the last field:
//!
//! | field                | size                         |
//! |----------------------|------------------------------|
//! | version id           | 16 bytes                     |
//! | effect class id      | 16 bytes                     |
//! | input count          | 4 bytes, signed, >= 0        |
//! | property XML         | UTF-8, NUL-terminated        |
//! | binding count        | 4 bytes, signed, >= 0        |
//! | per binding: name    | UTF-8, NUL-terminated        |
//! | per binding: getter  | pointer-sized address        |
//! | per binding: setter  | pointer-sized address        |
//! | factory              | pointer-sized address        |
//!
//! Integers and addresses are little-endian. The addresses are raw function
//! addresses of the producing process: a blob can be replayed by another
//! load context inside the same process, never by another process.

use std::mem::size_of;

use thiserror::Error;
use windows_core::GUID;

/// Version tag written at the start of every blob. Any other value is rejected.
pub const BLOB_VERSION_ID: GUID = GUID::from_u128(0x5F6C1A3E_2B7D_4C91_9E0A_8D4B3F27C615);

const ADDRESS_SIZE: usize = size_of::<usize>();

/// Smallest possible blob: header, empty XML, zero bindings, factory address.
pub const MIN_BLOB_SIZE: usize = 16 + 16 + 4 + 1 + 4 + ADDRESS_SIZE;

/// Reasons a blob can fail to decode (or, for the count and text variants,
/// to encode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum BlobError {
    #[error("the registration blob is empty")]
    EmptyBuffer,

    #[error("the registration blob is too short")]
    BufferTooShort,

    #[error("the registration blob has trailing bytes")]
    BufferTooLong,

    #[error("the registration blob was produced by an incompatible version")]
    MismatchedBlobVersionId,

    #[error("the registration blob has an invalid input count")]
    InvalidInputCount,

    #[error("the registration blob has malformed property XML")]
    InvalidPropertyXml,

    #[error("the registration blob has an invalid binding count")]
    InvalidBindingCount,

    #[error("the registration blob has a malformed binding name")]
    InvalidBindingName,

    #[error("the registration blob could not be processed")]
    Unknown,
}

impl BlobError {
    /// Stable status code, for reporting a failure across a boundary that only
    /// carries integers. Zero is reserved for success.
    pub const fn code(self) -> i32 {
        match self {
            BlobError::EmptyBuffer => 1,
            BlobError::BufferTooShort => 2,
            BlobError::BufferTooLong => 3,
            BlobError::MismatchedBlobVersionId => 4,
            BlobError::InvalidInputCount => 5,
            BlobError::InvalidPropertyXml => 6,
            BlobError::InvalidBindingCount => 7,
            BlobError::InvalidBindingName => 8,
            BlobError::Unknown => -1,
        }
    }

    /// Inverse of [`BlobError::code`]. Unrecognized codes map to `Unknown`.
    pub const fn from_code(code: i32) -> BlobError {
        match code {
            1 => BlobError::EmptyBuffer,
            2 => BlobError::BufferTooShort,
            3 => BlobError::BufferTooLong,
            4 => BlobError::MismatchedBlobVersionId,
            5 => BlobError::InvalidInputCount,
            6 => BlobError::InvalidPropertyXml,
            7 => BlobError::InvalidBindingCount,
            8 => BlobError::InvalidBindingName,
            _ => BlobError::Unknown,
        }
    }

    /// Interprets a status code where zero means success.
    pub const fn check(code: i32) -> Result<(), BlobError> {
        if code == 0 {
            Ok(())
        } else {
            Err(BlobError::from_code(code))
        }
    }
}

/// One property binding at the address level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingRecord {
    pub name: String,
    pub getter: usize,
    pub setter: usize,
}

/// Effect registration metadata as carried by the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationBlob {
    pub class_id: GUID,
    pub input_count: u32,
    pub property_xml: String,
    pub bindings: Vec<BindingRecord>,
    pub factory: usize,
}

impl RegistrationBlob {
    /// Serializes the metadata. The output depends only on `self`.
    pub fn encode(&self) -> Result<Vec<u8>, BlobError> {
        let input_count =
            i32::try_from(self.input_count).map_err(|_| BlobError::InvalidInputCount)?;
        let binding_count =
            i32::try_from(self.bindings.len()).map_err(|_| BlobError::InvalidBindingCount)?;

        let mut writer = Writer::with_capacity(self.encoded_len());
        writer.guid(&BLOB_VERSION_ID);
        writer.guid(&self.class_id);
        writer.i32(input_count);
        writer.c_str(&self.property_xml, BlobError::InvalidPropertyXml)?;
        writer.i32(binding_count);

        for binding in &self.bindings {
            if binding.name.is_empty() {
                return Err(BlobError::InvalidBindingName);
            }
            writer.c_str(&binding.name, BlobError::InvalidBindingName)?;
            writer.address(binding.getter);
            writer.address(binding.setter);
        }

        writer.address(self.factory);

        log::debug!(
            "encoded registration blob for {:?} ({} bytes, {} bindings)",
            self.class_id,
            writer.bytes.len(),
            self.bindings.len()
        );

        Ok(writer.bytes)
    }

    /// Parses a blob, checking every field against the remaining buffer
    /// before consuming it.
    pub fn decode(bytes: &[u8]) -> Result<Self, BlobError> {
        if bytes.is_empty() {
            return Err(BlobError::EmptyBuffer);
        }
        if bytes.len() < MIN_BLOB_SIZE {
            return Err(BlobError::BufferTooShort);
        }

        let mut reader = Reader::new(bytes);

        if reader.guid()? != BLOB_VERSION_ID {
            return Err(BlobError::MismatchedBlobVersionId);
        }

        let class_id = reader.guid()?;

        let input_count =
            u32::try_from(reader.i32()?).map_err(|_| BlobError::InvalidInputCount)?;

        let property_xml = reader.c_str(BlobError::InvalidPropertyXml)?.to_owned();

        let binding_count =
            usize::try_from(reader.i32()?).map_err(|_| BlobError::InvalidBindingCount)?;

        // The count is untrusted, so only reserve what the buffer could hold.
        let max_possible = reader.remaining() / (2 + 2 * ADDRESS_SIZE);
        let mut bindings = Vec::with_capacity(binding_count.min(max_possible));

        for _ in 0..binding_count {
            let name = reader.c_str(BlobError::InvalidBindingName)?;
            if name.is_empty() {
                return Err(BlobError::InvalidBindingName);
            }
            let name = name.to_owned();
            let getter = reader.address()?;
            let setter = reader.address()?;
            bindings.push(BindingRecord {
                name,
                getter,
                setter,
            });
        }

        let factory = reader.address()?;

        if reader.remaining() != 0 {
            return Err(BlobError::BufferTooLong);
        }

        Ok(Self {
            class_id,
            input_count,
            property_xml,
            bindings,
            factory,
        })
    }

    fn encoded_len(&self) -> usize {
        let bindings: usize = self
            .bindings
            .iter()
            .map(|b| b.name.len() + 1 + 2 * ADDRESS_SIZE)
            .sum();
        16 + 16 + 4 + self.property_xml.len() + 1 + 4 + bindings + ADDRESS_SIZE
    }
}

struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Writes the in-memory `GUID` layout: little-endian fields, then `data4`.
    fn guid(&mut self, guid: &GUID) {
        self.bytes.extend_from_slice(&guid.data1.to_le_bytes());
        self.bytes.extend_from_slice(&guid.data2.to_le_bytes());
        self.bytes.extend_from_slice(&guid.data3.to_le_bytes());
        self.bytes.extend_from_slice(&guid.data4);
    }

    fn i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn address(&mut self, value: usize) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn c_str(&mut self, text: &str, malformed: BlobError) -> Result<(), BlobError> {
        if text.as_bytes().contains(&0) {
            return Err(malformed);
        }
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], BlobError> {
        if self.remaining() < len {
            return Err(BlobError::BufferTooShort);
        }
        let slice = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], BlobError> {
        let slice = self.take(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    fn guid(&mut self) -> Result<GUID, BlobError> {
        let data1 = u32::from_le_bytes(self.take_array()?);
        let data2 = u16::from_le_bytes(self.take_array()?);
        let data3 = u16::from_le_bytes(self.take_array()?);
        Ok(GUID::from_values(data1, data2, data3, self.take_array()?))
    }

    fn i32(&mut self) -> Result<i32, BlobError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    fn address(&mut self) -> Result<usize, BlobError> {
        Ok(usize::from_le_bytes(self.take_array()?))
    }

    fn c_str(&mut self, malformed: BlobError) -> Result<&'a str, BlobError> {
        let rest = &self.bytes[self.position..];
        let terminator = rest.iter().position(|&b| b == 0).ok_or(malformed)?;
        let text = std::str::from_utf8(&rest[..terminator]).map_err(|_| malformed)?;
        self.position += terminator + 1;
        Ok(text)
    }
}
