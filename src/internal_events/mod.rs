//! Noteworthy conditions observed by the readers.
//!
//! Each event is a plain struct describing what happened; emitting it logs the
//! occurrence with structured fields. Events never influence control flow.

mod encoding_transcode;
mod multiline;
mod reader;

pub(crate) use self::{encoding_transcode::*, multiline::*, reader::*};

/// An observation that can be reported.
pub trait InternalEvent: Sized {
    fn emit(self);
}

macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::InternalEvent::emit($event)
    };
}
