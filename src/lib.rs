#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![allow(clippy::type_complexity)]
#![deny(clippy::clone_on_ref_ptr)]
#![deny(clippy::trivially_copy_pass_by_ref)]

//! The ingestion front-end of a log shipper.
//!
//! Raw bytes read from a file are decoded from their source charset, split into
//! lines, stripped of their terminators and optionally recombined into multiline
//! events. Every [`Message`] carries the exact number of raw source bytes that
//! produced it, so that summing them gives a checkpoint offset that is safe to
//! resume from.
#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod config;
pub mod encoding_transcode;
pub mod message;
pub mod multiline;
pub mod reader;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::{EncodingConfig, LineTerminator, ReaderConfig};
pub use message::{Fields, Message};
pub use reader::{MessageReader, ReadError};

/// Spawn a task with the given name. The name is only used if
/// built with [`tokio_unstable`][tokio_unstable].
///
/// [tokio_unstable]: https://docs.rs/tokio/latest/tokio/#unstable-features
#[track_caller]
pub(crate) fn spawn_named<T>(
    task: impl std::future::Future<Output = T> + Send + 'static,
    _name: &str,
) -> tokio::task::JoinHandle<T>
where
    T: Send + 'static,
{
    #[cfg(tokio_unstable)]
    return tokio::task::Builder::new()
        .name(_name)
        .spawn(task)
        .expect("tokio task should spawn");

    #[cfg(not(tokio_unstable))]
    tokio::spawn(task)
}
