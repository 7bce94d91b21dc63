use crate::Timestamp;

// BUFFER TAG
// ================================================================================================

/// Named sections of the peer-exchange wire content.
///
/// Both peers must put and get sections in the same order; a tag mismatch on read is fatal and
/// indicates a registration-order bug in the pattern set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum BufferTag {
    /// Delay-analysis payload (time maps and scales).
    Delay = 1,
    /// Critical-path flag transfer.
    CriticalPath = 2,
    /// Propagating-wait payload.
    PropWait = 3,
    /// Remote cost payload for late-sender wait states.
    RcostLs = 4,
    /// Remote cost payload for late-receiver wait states.
    RcostLr = 5,
    /// Remote cost payload for barrier wait states.
    RcostBarrier = 6,
    /// Remote cost payload for N-to-N collective wait states.
    RcostN2n = 7,
    /// Remote cost payload for one-to-N collective wait states.
    Rcost12n = 8,
    /// Remote cost payload for N-to-one collective wait states.
    RcostN21 = 9,
    /// Remote cost payload for OpenMP barrier wait states.
    RcostOmpBarrier = 10,
    /// Remote cost payload for OpenMP idleness wait states.
    RcostOmpIdle = 11,
}

impl BufferTag {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Delay),
            2 => Some(Self::CriticalPath),
            3 => Some(Self::PropWait),
            4 => Some(Self::RcostLs),
            5 => Some(Self::RcostLr),
            6 => Some(Self::RcostBarrier),
            7 => Some(Self::RcostN2n),
            8 => Some(Self::Rcost12n),
            9 => Some(Self::RcostN21),
            10 => Some(Self::RcostOmpBarrier),
            11 => Some(Self::RcostOmpIdle),
            _ => None,
        }
    }
}

// TYPE MARK
// ================================================================================================

/// Per-value type marker; every scalar written into a buffer is preceded by one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
enum TypeMark {
    U8 = 1,
    U32 = 2,
    U64 = 3,
    I32 = 4,
    F64 = 5,
    Time = 6,
    Section = 7,
}

impl TypeMark {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::U8),
            2 => Some(Self::U32),
            3 => Some(Self::U64),
            4 => Some(Self::I32),
            5 => Some(Self::F64),
            6 => Some(Self::Time),
            7 => Some(Self::Section),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I32 => "i32",
            Self::F64 => "f64",
            Self::Time => "timestamp",
            Self::Section => "section header",
        }
    }
}

// BUFFER ERROR
// ================================================================================================

/// Errors surfaced by typed buffer access.
///
/// All of these indicate a programming error in the pattern set (mismatched put/get sequences
/// between peers) and are fatal to the analysis.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// A get read a value of the wrong primitive kind.
    #[error("buffer type mismatch at byte {pos}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Byte position of the offending marker.
        pos: usize,
        /// What the reader asked for.
        expected: &'static str,
        /// What the writer put there.
        found: &'static str,
    },
    /// A get ran past the end of the buffer.
    #[error("buffer exhausted at byte {pos}, {needed} more byte(s) needed")]
    UnexpectedEnd {
        /// Byte position at which the read started.
        pos: usize,
        /// Bytes the read still needed.
        needed: usize,
    },
    /// A marker byte did not decode to any known type.
    #[error("corrupt buffer: unknown type marker {marker:#x} at byte {pos}")]
    UnknownMarker {
        /// Byte position of the marker.
        pos: usize,
        /// The raw marker value.
        marker: u8,
    },
    /// A section header named a different tag than the reader expected.
    #[error("buffer section mismatch: expected {expected:?}, found {found:?}")]
    SectionMismatch {
        /// The tag the reader expected next.
        expected: BufferTag,
        /// The tag the writer framed.
        found: BufferTag,
    },
    /// A section header byte did not decode to any known tag.
    #[error("corrupt buffer: unknown section tag {tag:#x} at byte {pos}")]
    UnknownSection {
        /// Byte position of the tag.
        pos: usize,
        /// The raw tag value.
        tag: u8,
    },
}

// BUFFER
// ================================================================================================

/// A typed serialization blob shipped between peers at communication events.
///
/// Writes append; reads consume from the front. Each value carries a one-byte type marker, so a
/// `get_` of the wrong kind fails loudly instead of silently mis-decoding, and sections are
/// framed with a length prefix so the wire content is bit-exact between peers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Buffer {
    bytes: Vec<u8>,
    pos: usize,
    open_sections: Vec<usize>,
}

impl Buffer {
    /// Returns a new, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps received wire bytes for reading.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, pos: 0, open_sections: Vec::new() }
    }

    /// Returns the wire bytes of the buffer.
    ///
    /// # Panics
    /// Panics if a section is still open.
    pub fn into_bytes(self) -> Vec<u8> {
        assert!(self.open_sections.is_empty(), "unclosed buffer section");
        self.bytes
    }

    /// Returns the number of bytes not yet consumed by reads.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Returns true if every written byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    // WRITING
    // --------------------------------------------------------------------------------------------

    fn put_mark(&mut self, mark: TypeMark) {
        self.bytes.push(mark as u8);
    }

    /// Appends a `u8`.
    pub fn put_u8(&mut self, value: u8) {
        self.put_mark(TypeMark::U8);
        self.bytes.push(value);
    }

    /// Appends a `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.put_mark(TypeMark::U32);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a `u64`.
    pub fn put_u64(&mut self, value: u64) {
        self.put_mark(TypeMark::U64);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends an `i32`.
    pub fn put_i32(&mut self, value: i32) {
        self.put_mark(TypeMark::I32);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends an `f64`.
    pub fn put_f64(&mut self, value: f64) {
        self.put_mark(TypeMark::F64);
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Appends a timestamp.
    pub fn put_time(&mut self, value: Timestamp) {
        self.put_mark(TypeMark::Time);
        self.bytes.extend_from_slice(&value.secs().to_le_bytes());
    }

    /// Opens a named section. Must be balanced by [`Self::end_section`].
    pub fn begin_section(&mut self, tag: BufferTag) {
        self.put_mark(TypeMark::Section);
        self.bytes.push(tag as u8);
        self.open_sections.push(self.bytes.len());
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
    }

    /// Closes the most recently opened section, patching its length prefix.
    ///
    /// # Panics
    /// Panics if no section is open.
    pub fn end_section(&mut self) {
        let at = self.open_sections.pop().expect("end_section without begin_section");
        let len = (self.bytes.len() - at - 4) as u32;
        self.bytes[at..at + 4].copy_from_slice(&len.to_le_bytes());
    }

    // READING
    // --------------------------------------------------------------------------------------------

    fn take(&mut self, n: usize) -> Result<&[u8], BufferError> {
        if self.remaining() < n {
            return Err(BufferError::UnexpectedEnd {
                pos: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn get_mark(&mut self, expected: TypeMark) -> Result<(), BufferError> {
        let pos = self.pos;
        let byte = self.take(1)?[0];
        let found = TypeMark::from_u8(byte)
            .ok_or(BufferError::UnknownMarker { pos, marker: byte })?;
        if found != expected {
            return Err(BufferError::TypeMismatch {
                pos,
                expected: expected.name(),
                found: found.name(),
            });
        }
        Ok(())
    }

    /// Consumes a `u8`.
    pub fn get_u8(&mut self) -> Result<u8, BufferError> {
        self.get_mark(TypeMark::U8)?;
        Ok(self.take(1)?[0])
    }

    /// Consumes a `u32`.
    pub fn get_u32(&mut self) -> Result<u32, BufferError> {
        self.get_mark(TypeMark::U32)?;
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    /// Consumes a `u64`.
    pub fn get_u64(&mut self) -> Result<u64, BufferError> {
        self.get_mark(TypeMark::U64)?;
        let bytes = self.take(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Consumes an `i32`.
    pub fn get_i32(&mut self) -> Result<i32, BufferError> {
        self.get_mark(TypeMark::I32)?;
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    /// Consumes an `f64`.
    pub fn get_f64(&mut self) -> Result<f64, BufferError> {
        self.get_mark(TypeMark::F64)?;
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().expect("8-byte slice")))
    }

    /// Consumes a timestamp.
    pub fn get_time(&mut self) -> Result<Timestamp, BufferError> {
        self.get_mark(TypeMark::Time)?;
        let bytes = self.take(8)?;
        Ok(Timestamp::new(f64::from_le_bytes(bytes.try_into().expect("8-byte slice"))))
    }

    /// Consumes a section header, checking its tag against the reader's expectation.
    pub fn expect_section(&mut self, expected: BufferTag) -> Result<(), BufferError> {
        self.get_mark(TypeMark::Section)?;
        let pos = self.pos;
        let byte = self.take(1)?[0];
        let found =
            BufferTag::from_u8(byte).ok_or(BufferError::UnknownSection { pos, tag: byte })?;
        // skip the length prefix; readers consume sections value by value
        self.take(4)?;
        if found != expected {
            return Err(BufferError::SectionMismatch { expected, found });
        }
        Ok(())
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn scalars_round_trip() {
        let mut buf = Buffer::new();
        buf.put_u8(7);
        buf.put_u32(123_456);
        buf.put_u64(u64::MAX - 1);
        buf.put_i32(-42);
        buf.put_f64(3.5);
        buf.put_time(Timestamp::new(12.25));

        let mut buf = Buffer::from_bytes(buf.into_bytes());
        assert_eq!(buf.get_u8().unwrap(), 7);
        assert_eq!(buf.get_u32().unwrap(), 123_456);
        assert_eq!(buf.get_u64().unwrap(), u64::MAX - 1);
        assert_eq!(buf.get_i32().unwrap(), -42);
        assert_eq!(buf.get_f64().unwrap(), 3.5);
        assert_eq!(buf.get_time().unwrap(), Timestamp::new(12.25));
        assert!(buf.is_exhausted());
    }

    #[test]
    fn wrong_kind_get_is_a_type_mismatch() {
        let mut buf = Buffer::new();
        buf.put_f64(1.0);
        let mut buf = Buffer::from_bytes(buf.into_bytes());
        let err = buf.get_u32().unwrap_err();
        assert!(matches!(err, BufferError::TypeMismatch { expected: "u32", found: "f64", .. }));
    }

    #[test]
    fn section_tags_must_match() {
        let mut buf = Buffer::new();
        buf.begin_section(BufferTag::Delay);
        buf.put_f64(1.0);
        buf.end_section();

        let mut buf = Buffer::from_bytes(buf.into_bytes());
        let err = buf.expect_section(BufferTag::CriticalPath).unwrap_err();
        assert!(matches!(
            err,
            BufferError::SectionMismatch {
                expected: BufferTag::CriticalPath,
                found: BufferTag::Delay
            }
        ));
    }

    #[test]
    fn nested_sections_patch_their_lengths() {
        let mut buf = Buffer::new();
        buf.begin_section(BufferTag::Delay);
        buf.put_u32(1);
        buf.begin_section(BufferTag::PropWait);
        buf.put_u32(2);
        buf.end_section();
        buf.end_section();

        let mut buf = Buffer::from_bytes(buf.into_bytes());
        buf.expect_section(BufferTag::Delay).unwrap();
        assert_eq!(buf.get_u32().unwrap(), 1);
        buf.expect_section(BufferTag::PropWait).unwrap();
        assert_eq!(buf.get_u32().unwrap(), 2);
        assert!(buf.is_exhausted());
    }

    #[test]
    fn reading_past_the_end_fails() {
        let mut buf = Buffer::new();
        buf.put_u8(1);
        let mut buf = Buffer::from_bytes(buf.into_bytes());
        buf.get_u8().unwrap();
        assert!(matches!(buf.get_u8(), Err(BufferError::UnexpectedEnd { .. })));
    }

    proptest! {
        #[test]
        fn f64_round_trip(value in proptest::num::f64::NORMAL) {
            let mut buf = Buffer::new();
            buf.put_f64(value);
            let mut buf = Buffer::from_bytes(buf.into_bytes());
            prop_assert_eq!(buf.get_f64().unwrap(), value);
        }
    }
}
