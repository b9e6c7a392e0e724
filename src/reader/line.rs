use std::{io, mem};

use bstr::Finder;
use bytes::{Buf, Bytes, BytesMut};
use encoding_rs::Encoding;
use snafu::{ensure, OptionExt, Snafu};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::ReadError;
use crate::{
    config::LineTerminator,
    encoding_transcode::{Decoder, Encoder},
    internal_events::LineTooLongSkipped,
};

/// Errors raised while building a [`LineReader`].
#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("buffer_size must be greater than zero"))]
    ZeroBufferSize,
    #[snafu(display("line terminator {:?} has no representation in {}", terminator, encoding))]
    UnencodableTerminator {
        terminator: LineTerminator,
        encoding: &'static str,
    },
}

/// Settings of a [`LineReader`].
#[derive(Clone, Copy, Debug)]
pub struct LineReaderConfig {
    /// Charset of the source, `None` passes bytes through untouched.
    pub encoding: Option<&'static Encoding>,
    pub terminator: LineTerminator,
    /// Size of a single read from the source.
    pub buffer_size: usize,
    /// Maximum raw length of a line, excluding its terminator. `0` disables the limit.
    pub max_bytes: usize,
    /// Returns undelimited bytes as a final line when the source ends.
    pub collect_on_eof: bool,
}

/// Splits a raw byte stream into decoded lines.
///
/// The terminator is searched for in its *encoded* form and only bytes up to
/// and including a terminator are decoded. Every returned line comes with the
/// number of raw source bytes it consumed, including the bytes of any over-long
/// lines dropped right before it, so that adding up the counts yields the
/// position in the source.
pub struct LineReader<R> {
    source: Option<R>,
    decoder: Option<Decoder>,
    finder: Finder<'static>,
    terminator_len: usize,
    decoded_terminator: &'static [u8],
    max_bytes: usize,
    collect_on_eof: bool,
    scratch: Box<[u8]>,

    /// Raw bytes read from the source but not yet decoded.
    in_buffer: BytesMut,
    /// Position in `in_buffer` from which to continue searching for a terminator.
    in_offset: usize,
    /// Decoded content of the line being assembled.
    out_buffer: BytesMut,
    /// Raw bytes already decoded into `out_buffer`.
    decoded_raw: usize,
    /// Raw bytes of the over-long line currently being discarded.
    dropping: usize,
    /// Raw bytes of dropped lines, attributed to the next returned line.
    skipped: usize,
    /// Whether an over-long line is being discarded up to its terminator.
    skipping: bool,
    pending_error: Option<ReadError>,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(source: R, config: LineReaderConfig) -> Result<Self, BuildError> {
        ensure!(config.buffer_size > 0, ZeroBufferSizeSnafu);

        let decoded_terminator = config.terminator.as_str();
        // The delimiter is configured as utf8 and has to be searched for in the
        // source encoding.
        let terminator = match config.encoding {
            Some(encoding) => Encoder::new(encoding)
                .try_encode_from_utf8(decoded_terminator)
                .context(UnencodableTerminatorSnafu {
                    terminator: config.terminator,
                    encoding: encoding.name(),
                })?,
            None => Bytes::from_static(decoded_terminator.as_bytes()),
        };

        Ok(Self {
            source: Some(source),
            decoder: config.encoding.map(Decoder::new),
            finder: Finder::new(&terminator).into_owned(),
            terminator_len: terminator.len(),
            decoded_terminator: decoded_terminator.as_bytes(),
            max_bytes: config.max_bytes,
            collect_on_eof: config.collect_on_eof,
            scratch: vec![0; config.buffer_size].into_boxed_slice(),
            in_buffer: BytesMut::with_capacity(config.buffer_size),
            in_offset: 0,
            out_buffer: BytesMut::new(),
            decoded_raw: 0,
            dropping: 0,
            skipped: 0,
            skipping: false,
            pending_error: None,
        })
    }

    /// Returns the next decoded line, terminator included, and the number of
    /// raw bytes consumed to produce it.
    ///
    /// An incomplete line stays buffered when the source ends or fails, and is
    /// returned once a later read completes it. Bytes of over-long lines dropped
    /// before that point are reported first as an empty line, so the position
    /// never lags behind the last terminator. With `collect_on_eof` the
    /// incomplete line is returned at the end of the source instead, followed by
    /// [`ReadError::Eof`] on the next call.
    pub async fn next_line(&mut self) -> Result<(Bytes, usize), ReadError> {
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }

        loop {
            if let Some(idx) = self.find_terminator() {
                let line_end = idx + self.terminator_len;

                if self.skipping || self.exceeds_max_bytes(idx) {
                    self.drop_line(line_end);
                    continue;
                }

                let raw = self.in_buffer.split_to(line_end);
                self.in_offset = 0;
                self.decode(&raw, false);

                // A terminator match in the raw bytes can turn out to be part of
                // another character once decoded, keep looking in that case.
                if self.out_buffer.ends_with(self.decoded_terminator) {
                    return Ok(self.take_line());
                }
                continue;
            }

            if !self.skipping && self.exceeds_max_bytes(self.in_buffer.len()) {
                self.skipping = true;
                self.dropping += mem::take(&mut self.decoded_raw);
                self.out_buffer.clear();
            }

            if self.skipping {
                // Keep what could be the start of a terminator split across reads.
                let discard = self
                    .in_buffer
                    .len()
                    .saturating_sub(self.terminator_len - 1);
                self.in_buffer.advance(discard);
                self.dropping += discard;
            }

            self.in_offset = self
                .in_buffer
                .len()
                .saturating_sub(self.terminator_len - 1);

            match self.fill().await {
                Ok(0) if self.collect_on_eof => return self.flush_remaining(ReadError::Eof),
                Ok(0) => return self.report_skipped(ReadError::Eof),
                Ok(_) => {}
                Err(error) => return self.report_skipped(error.into()),
            }
        }
    }

    /// Drops the source. Subsequent reads return [`ReadError::Eof`].
    pub fn close(&mut self) {
        self.source = None;
    }

    fn find_terminator(&self) -> Option<usize> {
        self.finder
            .find(&self.in_buffer[self.in_offset..])
            .map(|idx| idx + self.in_offset)
    }

    const fn exceeds_max_bytes(&self, pending: usize) -> bool {
        self.max_bytes > 0 && self.decoded_raw + pending > self.max_bytes
    }

    fn decode(&mut self, raw: &[u8], last: bool) {
        match self.decoder.as_mut() {
            Some(decoder) => decoder.decode_into(raw, &mut self.out_buffer, last),
            None => self.out_buffer.extend_from_slice(raw),
        }
        self.decoded_raw += raw.len();
    }

    fn take_line(&mut self) -> (Bytes, usize) {
        let line = self.out_buffer.split().freeze();
        let consumed = mem::take(&mut self.decoded_raw) + mem::take(&mut self.skipped);
        (line, consumed)
    }

    fn drop_line(&mut self, line_end: usize) {
        let line_bytes =
            mem::take(&mut self.dropping) + mem::take(&mut self.decoded_raw) + line_end;
        self.in_buffer.advance(line_end);
        self.in_offset = 0;
        self.out_buffer.clear();
        self.skipping = false;
        self.skipped += line_bytes;
        // Whatever partial character the decoder holds belonged to the dropped line.
        self.reset_decoder();

        emit!(LineTooLongSkipped {
            max_bytes: self.max_bytes,
            skipped_bytes: line_bytes,
        });
    }

    fn report_skipped(&mut self, error: ReadError) -> Result<(Bytes, usize), ReadError> {
        if self.skipped == 0 {
            return Err(error);
        }
        self.pending_error = Some(error);
        Ok((Bytes::new(), mem::take(&mut self.skipped)))
    }

    fn flush_remaining(&mut self, error: ReadError) -> Result<(Bytes, usize), ReadError> {
        if self.skipping {
            // The over-long line is still in progress, its bytes so far are
            // accounted for but its content is not returned.
            self.dropping += self.in_buffer.len();
            self.in_buffer.clear();
            self.in_offset = 0;
            let consumed = mem::take(&mut self.dropping) + mem::take(&mut self.skipped);
            if consumed == 0 {
                return Err(error);
            }
            self.pending_error = Some(error);
            return Ok((Bytes::new(), consumed));
        }

        if self.in_buffer.is_empty() && self.decoded_raw == 0 && self.skipped == 0 {
            return Err(error);
        }

        let raw = self.in_buffer.split();
        self.in_offset = 0;
        self.decode(&raw, true);
        self.reset_decoder();
        self.pending_error = Some(error);
        Ok(self.take_line())
    }

    fn reset_decoder(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            *decoder = Decoder::new(decoder.encoding());
        }
    }

    async fn fill(&mut self) -> io::Result<usize> {
        let Some(source) = self.source.as_mut() else {
            return Ok(0);
        };

        loop {
            match source.read(&mut self.scratch).await {
                Ok(n) => {
                    self.in_buffer.extend_from_slice(&self.scratch[..n]);
                    return Ok(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
