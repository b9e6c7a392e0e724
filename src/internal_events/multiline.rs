use super::InternalEvent;

#[derive(Debug)]
pub(crate) struct MultilineFlushed {
    pub(crate) reason: &'static str,
    pub(crate) lines: usize,
    pub(crate) bytes: usize,
}

impl InternalEvent for MultilineFlushed {
    fn emit(self) {
        trace!(
            message = "Multiline event flushed.",
            reason = %self.reason,
            lines = %self.lines,
            bytes = %self.bytes,
        );
    }
}

#[derive(Debug)]
pub(crate) struct MultilineFlushedAfterError<'a> {
    pub(crate) error: &'a crate::ReadError,
    pub(crate) lines: usize,
}

impl InternalEvent for MultilineFlushedAfterError<'_> {
    fn emit(self) {
        debug!(
            message = "Multiline event flushed because the underlying reader failed, error follows on next read.",
            error = %self.error,
            lines = %self.lines,
        );
    }
}
