use bstr::ByteSlice;
use bytes::{Bytes, BytesMut};
use encoding_rs::{DecoderResult, EncoderResult, Encoding};

use crate::internal_events::{DecoderBomRemoval, DecoderMalformedPassthrough};

const BUFFER_SIZE: usize = 4096;

/// Most bytes an `encoding_rs` decoder holds back between two calls.
const MAX_HELD_BYTES: usize = 3;

// BOM unicode character (U+FEFF) expressed in utf-8
// http://unicode.org/faq/utf_bom.html#bom4
const BOM_UTF8: &[u8] = b"\xef\xbb\xbf";
const BOM_UTF8_LEN: usize = BOM_UTF8.len();

/// Helps transcoding from the specified encoding to utf8
///
/// The decoder is stateful: a multi-byte character split across two calls to
/// [`Decoder::decode_into`] is held back and completed by the next call.
pub struct Decoder {
    buffer: [u8; BUFFER_SIZE],
    inner: encoding_rs::Decoder,
    /// Trailing bytes of the input fed so far, which may start a malformed
    /// sequence reported by a later call.
    tail: Vec<u8>,
}

impl Decoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            // BOM handling in encoding_rs only covers the very start of the
            // stream. We may see BOM markers later on too, so they are removed
            // from decoded lines by `strip_bom` instead.
            inner: encoding.new_decoder_without_bom_handling(),
            tail: Vec::with_capacity(2 * MAX_HELD_BYTES),
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.inner.encoding()
    }

    /// Decodes all of `input` to utf8, appending the result to `output`.
    ///
    /// Malformed byte sequences are not replaced: they are copied to `output`
    /// verbatim so that undecodable input never stalls the reader. `last`
    /// flushes any partial character held from previous calls.
    pub fn decode_into(&mut self, input: &[u8], output: &mut BytesMut, last: bool) {
        let mut total_read_from_input = 0;
        let mut malformed_bytes = 0;

        loop {
            let (result, read, written) = self.inner.decode_to_utf8_without_replacement(
                &input[total_read_from_input..],
                &mut self.buffer,
                last,
            );

            total_read_from_input += read;
            output.extend_from_slice(&self.buffer[..written]);

            match result {
                DecoderResult::InputEmpty => break, // we have consumed all of the given input so we are done!
                DecoderResult::OutputFull => (), // continue reading from the input in the next loop iteration
                DecoderResult::Malformed(malformed, consumed_after) => {
                    let malformed = malformed as usize;
                    let end = total_read_from_input - consumed_after as usize;
                    if malformed > end {
                        // The sequence started in input fed by a previous call.
                        let held = (malformed - end).min(self.tail.len());
                        output.extend_from_slice(&self.tail[self.tail.len() - held..]);
                    }
                    output.extend_from_slice(&input[end.saturating_sub(malformed)..end]);
                    malformed_bytes += malformed;
                }
            }
        }

        self.tail
            .extend_from_slice(&input[input.len().saturating_sub(MAX_HELD_BYTES)..]);
        let stale = self.tail.len().saturating_sub(MAX_HELD_BYTES);
        self.tail.drain(..stale);

        if malformed_bytes > 0 {
            emit!(DecoderMalformedPassthrough {
                from_encoding: self.inner.encoding().name(),
                malformed_bytes,
            });
        }
    }
}

/// Removes every utf8 BOM sequence from `input`.
///
/// A BOM carries no information once the source encoding is known, and
/// leaving it in place would throw off downstream processing of the content.
/// BOM markers may appear at the start of a line or embedded in it, e.g. when
/// a file was assembled by concatenating several files.
pub fn strip_bom(input: Bytes) -> Bytes {
    let Some(first) = input[..].find(BOM_UTF8) else {
        return input;
    };

    emit!(DecoderBomRemoval {
        from_encoding: "UTF-8"
    });

    if first == 0 && input[BOM_UTF8_LEN..].find(BOM_UTF8).is_none() {
        return input.slice(BOM_UTF8_LEN..);
    }

    let mut output = BytesMut::with_capacity(input.len());
    let mut rest = &input[..];
    while let Some(idx) = rest.find(BOM_UTF8) {
        output.extend_from_slice(&rest[..idx]);
        rest = &rest[idx + BOM_UTF8_LEN..];
    }
    output.extend_from_slice(rest);
    output.freeze()
}

/// Helps transcoding to the specified encoding from utf8
pub struct Encoder {
    buffer: [u8; BUFFER_SIZE],
    output: BytesMut,
    inner: encoding_rs::Encoder,
    // Useful for tracking whether the encoder's encoding is utf-16 (and when it
    // is, its variety). Since encoding_rs does not have encoders for utf-16,
    // this is necessary:
    // https://docs.rs/encoding_rs/0.8.26/encoding_rs/index.html#utf-16le-utf-16be-and-unicode-encoding-schemes
    utf16_encoding: Option<Utf16Encoding>,
}

#[derive(Debug, Clone, Copy)]
enum Utf16Encoding {
    Le, // little-endian
    Be, // big-endian
}

impl Encoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            output: BytesMut::new(),
            inner: encoding.new_encoder(),
            utf16_encoding: Self::get_utf16_encoding(encoding),
        }
    }

    fn get_utf16_encoding(encoding: &'static Encoding) -> Option<Utf16Encoding> {
        match encoding.name() {
            "UTF-16LE" => Some(Utf16Encoding::Le),
            "UTF-16BE" => Some(Utf16Encoding::Be),
            _ => None,
        }
    }

    fn encode_from_utf8_to_utf16(&mut self, input: &str, variant: Utf16Encoding) -> Bytes {
        let to_bytes_func = match variant {
            Utf16Encoding::Le => u16::to_le_bytes,
            Utf16Encoding::Be => u16::to_be_bytes,
        };

        for utf16_value in input.encode_utf16() {
            self.output.extend_from_slice(&to_bytes_func(utf16_value));
        }

        self.output.split().freeze()
    }

    /// Encodes `input`, or returns `None` if the encoding cannot represent
    /// some of its characters.
    pub fn try_encode_from_utf8(&mut self, input: &str) -> Option<Bytes> {
        if let Some(variant) = self.utf16_encoding {
            return Some(self.encode_from_utf8_to_utf16(input, variant));
        }

        let mut total_read_from_input = 0;

        loop {
            let (result, read, written) = self.inner.encode_from_utf8_without_replacement(
                &input[total_read_from_input..],
                &mut self.buffer,
                false,
            );

            total_read_from_input += read;
            self.output.extend_from_slice(&self.buffer[..written]);

            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => (),
                EncoderResult::Unmappable(_) => {
                    self.output.clear();
                    return None;
                }
            }
        }

        Some(self.output.split().freeze())
    }

}
