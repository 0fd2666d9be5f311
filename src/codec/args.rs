//! Parameter-tuple helpers.
//!
//! A call's arguments travel as one encoded array of heterogeneous values.
//! [`ParamList`] builds that array on the client; [`ParamsReader`] walks it
//! on the server, one expected type per position, and can detect surplus
//! arguments without knowing their types.

use bytes::{BufMut, Bytes, BytesMut};

use super::{AnyDecoder, AnyEncoder, CodecError, CodecKind, CodecResult, Decoder, WireValue};

/// Builder for an encoded argument tuple.
///
/// Arguments are encoded one by one and assembled into the codec's array
/// form by [`ParamList::finish`].
#[derive(Debug)]
pub struct ParamList {
    codec: CodecKind,
    parts: Vec<Bytes>,
}

impl ParamList {
    #[must_use]
    pub const fn new(codec: CodecKind) -> Self {
        Self {
            codec,
            parts: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn push<T: WireValue>(&mut self, value: &T) -> &mut Self {
        let mut enc = AnyEncoder::new(self.codec);
        value.encode(&mut enc);
        self.parts.push(enc.finish());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize { self.parts.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.parts.is_empty() }

    /// Assemble the encoded tuple.
    #[must_use]
    pub fn finish(self) -> Bytes {
        match self.codec {
            CodecKind::Binary => {
                let mut out = BytesMut::new();
                out.put_u8(6); // array tag, see codec::binary
                debug_assert!(u32::try_from(self.parts.len()).is_ok());
                out.put_u32(self.parts.len() as u32);
                for part in &self.parts {
                    out.put_slice(part);
                }
                out.freeze()
            }
            CodecKind::Json => {
                let mut out = BytesMut::new();
                out.put_u8(b'[');
                for (i, part) in self.parts.iter().enumerate() {
                    if i > 0 {
                        out.put_u8(b',');
                    }
                    out.put_slice(part);
                }
                out.put_u8(b']');
                out.freeze()
            }
        }
    }
}

/// Positional walker over an encoded argument tuple.
///
/// The walk mirrors the decoder's array surface: each [`ParamsReader::next`]
/// consumes one position, [`ParamsReader::expect_end`] asserts exhaustion.
#[derive(Debug)]
pub struct ParamsReader {
    dec: AnyDecoder,
}

impl ParamsReader {
    /// Open the tuple for walking.
    ///
    /// # Errors
    /// Fails if the bytes do not start with the codec's array form.
    pub fn new(codec: CodecKind, params: Bytes) -> CodecResult<Self> {
        let mut dec = AnyDecoder::new(codec, params)?;
        dec.begin_array()?;
        Ok(Self { dec })
    }

    /// Decode the next argument, or `None` when the tuple is exhausted.
    ///
    /// # Errors
    /// Type mismatches surface as [`CodecError::Corrupt`].
    pub fn next<T: WireValue>(&mut self) -> CodecResult<Option<T>> {
        if !self.dec.array_continue()? {
            return Ok(None);
        }
        T::decode(&mut self.dec).map(Some)
    }

    /// Assert that no arguments remain.
    ///
    /// # Errors
    /// A surplus argument of any type is [`CodecError::Corrupt`].
    pub fn expect_end(&mut self) -> CodecResult<()> {
        if self.dec.array_continue()? {
            return Err(CodecError::corrupt("too many arguments"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::binary(CodecKind::Binary)]
    #[case::json(CodecKind::Json)]
    fn walks_heterogeneous_tuple(#[case] codec: CodecKind) {
        let mut list = ParamList::new(codec);
        list.push(&13i32).push(&2.5f64).push(&"text".to_owned());
        let encoded = list.finish();

        let mut reader = ParamsReader::new(codec, encoded).unwrap();
        assert_eq!(reader.next::<i32>().unwrap(), Some(13));
        assert_eq!(reader.next::<f64>().unwrap(), Some(2.5));
        assert_eq!(reader.next::<String>().unwrap(), Some("text".to_owned()));
        assert_eq!(reader.next::<i32>().unwrap(), None);
    }

    #[rstest]
    #[case::binary(CodecKind::Binary)]
    #[case::json(CodecKind::Json)]
    fn surplus_argument_is_detected(#[case] codec: CodecKind) {
        let mut list = ParamList::new(codec);
        list.push(&1i32).push(&2i32);
        let encoded = list.finish();

        let mut reader = ParamsReader::new(codec, encoded).unwrap();
        assert_eq!(reader.next::<i32>().unwrap(), Some(1));
        assert!(matches!(reader.expect_end(), Err(CodecError::Corrupt(_))));
    }

    #[rstest]
    #[case::binary(CodecKind::Binary)]
    #[case::json(CodecKind::Json)]
    fn empty_tuple(#[case] codec: CodecKind) {
        let encoded = ParamList::new(codec).finish();
        let mut reader = ParamsReader::new(codec, encoded).unwrap();
        assert_eq!(reader.next::<i32>().unwrap(), None);
    }

    #[rstest]
    #[case::binary(CodecKind::Binary)]
    #[case::json(CodecKind::Json)]
    fn wrong_type_is_corrupt(#[case] codec: CodecKind) {
        let mut list = ParamList::new(codec);
        list.push(&"abc".to_owned());
        let encoded = list.finish();

        let mut reader = ParamsReader::new(codec, encoded).unwrap();
        assert!(matches!(reader.next::<i32>(), Err(CodecError::Corrupt(_))));
    }
}
