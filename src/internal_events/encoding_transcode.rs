use super::InternalEvent;

#[derive(Debug)]
pub(crate) struct DecoderBomRemoval {
    pub(crate) from_encoding: &'static str,
}

impl InternalEvent for DecoderBomRemoval {
    fn emit(self) {
        trace!(
            message = "Removing initial BOM bytes from the final output while decoding to utf8.",
            from_encoding = %self.from_encoding,
        );
    }
}

#[derive(Debug)]
pub(crate) struct DecoderMalformedPassthrough {
    pub(crate) from_encoding: &'static str,
    pub(crate) malformed_bytes: usize,
}

impl InternalEvent for DecoderMalformedPassthrough {
    fn emit(self) {
        debug!(
            message = "Copied malformed byte sequences through undecoded.",
            from_encoding = %self.from_encoding,
            malformed_bytes = %self.malformed_bytes,
        );
    }
}
