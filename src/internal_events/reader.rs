use super::InternalEvent;

#[derive(Debug)]
pub(crate) struct LineTooLongSkipped {
    pub(crate) max_bytes: usize,
    pub(crate) skipped_bytes: usize,
}

impl InternalEvent for LineTooLongSkipped {
    fn emit(self) {
        warn!(
            message = "Exceeded max bytes in line limit, skipped line.",
            max_bytes = %self.max_bytes,
            skipped_bytes = %self.skipped_bytes,
        );
    }
}

#[derive(Debug)]
pub(crate) struct MessageTruncated {
    pub(crate) max_bytes: usize,
    pub(crate) dropped_bytes: usize,
}

impl InternalEvent for MessageTruncated {
    fn emit(self) {
        debug!(
            message = "Message content exceeded max bytes and was truncated.",
            max_bytes = %self.max_bytes,
            dropped_bytes = %self.dropped_bytes,
        );
    }
}

#[derive(Debug)]
pub(crate) struct TimeoutReaderClosed;

impl InternalEvent for TimeoutReaderClosed {
    fn emit(self) {
        debug!(message = "Timeout reader closed, stopping background reads.");
    }
}
