use std::{mem, time::Duration};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use super::{MessageReader, ReadError};
use crate::{internal_events::TimeoutReaderClosed, spawn_named, Message};

type ReadResult = Result<Message, ReadError>;

enum State<R> {
    /// No read in progress, the inner reader is owned directly.
    Idle(R),
    /// A background task pulls from the inner reader.
    Running {
        rx: mpsc::Receiver<ReadResult>,
        pump: JoinHandle<R>,
    },
    Closed,
}

/// Bounds how long [`MessageReader::next`] waits on the inner reader.
///
/// The inner reader is driven by a background task so that a read can outlive
/// a call to `next`: when no message arrives within `timeout` a
/// [`ReadError::Timeout`] is returned, and the message eventually read is
/// returned by a later call. Nothing is lost and the order is preserved.
///
/// After an error the task stops and hands the inner reader back, the next call
/// starts a new one.
pub struct TimeoutReader<R> {
    state: State<R>,
    timeout: Duration,
    done: CancellationToken,
}

impl<R> TimeoutReader<R>
where
    R: MessageReader + 'static,
{
    pub fn new(reader: R, timeout: Duration) -> Self {
        Self {
            state: State::Idle(reader),
            timeout,
            done: CancellationToken::new(),
        }
    }

    /// Returns a token that closes this reader when cancelled.
    ///
    /// A pending call to `next` returns [`ReadError::Eof`] right away.
    pub fn close_handle(&self) -> CancellationToken {
        self.done.clone()
    }

    fn start(&mut self) {
        self.state = match mem::replace(&mut self.state, State::Closed) {
            State::Idle(reader) => {
                let (tx, rx) = mpsc::channel(1);
                let pump = spawn_named(
                    pump(reader, tx, self.done.clone()),
                    "multiline-timeout-reader",
                );
                State::Running { rx, pump }
            }
            state => state,
        };
    }

    /// Waits for the background task to hand back the inner reader.
    async fn stop(&mut self) {
        self.state = match mem::replace(&mut self.state, State::Closed) {
            State::Running { pump, .. } => match pump.await {
                Ok(reader) if !self.done.is_cancelled() => State::Idle(reader),
                Ok(_) => State::Closed,
                Err(error) => {
                    error!(message = "Timeout reader task failed.", %error);
                    State::Closed
                }
            },
            state => state,
        };
    }
}

async fn pump<R: MessageReader>(
    mut reader: R,
    tx: mpsc::Sender<ReadResult>,
    done: CancellationToken,
) -> R {
    while !done.is_cancelled() {
        let result = reader.next().await;
        let failed = result.is_err();

        tokio::select! {
            biased;

            _ = done.cancelled() => break,
            sent = tx.send(result) => if sent.is_err() {
                break;
            },
        }

        if failed {
            return reader;
        }
    }

    if let Err(error) = reader.close().await {
        debug!(message = "Failed closing reader.", %error);
    }
    reader
}

#[async_trait]
impl<R> MessageReader for TimeoutReader<R>
where
    R: MessageReader + 'static,
{
    async fn next(&mut self) -> Result<Message, ReadError> {
        if self.done.is_cancelled() {
            if let State::Idle(mut reader) = mem::replace(&mut self.state, State::Closed) {
                if let Err(error) = reader.close().await {
                    debug!(message = "Failed closing reader.", %error);
                }
            }
            return Err(ReadError::Eof);
        }

        self.start();
        let State::Running { rx, .. } = &mut self.state else {
            return Err(ReadError::Eof);
        };

        let received = tokio::select! {
            biased;

            _ = self.done.cancelled() => return Err(ReadError::Eof),
            received = rx.recv() => received,
            _ = tokio::time::sleep(self.timeout) => return Err(ReadError::Timeout),
        };

        match received {
            Some(Ok(message)) => Ok(message),
            Some(Err(error)) => {
                self.stop().await;
                Err(error)
            }
            None => {
                self.stop().await;
                Err(ReadError::Eof)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        self.done.cancel();
        emit!(TimeoutReaderClosed);

        match mem::replace(&mut self.state, State::Closed) {
            State::Idle(mut reader) => reader.close().await,
            // The task closes the inner reader once its current read returns.
            State::Running { .. } | State::Closed => Ok(()),
        }
    }
}
