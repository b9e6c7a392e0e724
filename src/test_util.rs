use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{Message, MessageReader, ReadError};

/// Installs a log subscriber for tests, filtered by the `TEST_LOG` variable.
pub fn trace_init() {
    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_string());

    _ = tracing_subscriber::fmt()
        .with_env_filter(levels)
        .with_test_writer()
        .try_init();
}

/// One step of a [`ScriptedReader`].
#[derive(Debug)]
pub enum Step {
    /// Returns a message with this content, counting its length as consumed bytes.
    Line(&'static str),
    /// Returns a message consuming this many bytes but without content.
    Empty(usize),
    /// Sleeps before moving on to the next step.
    Wait(Duration),
    Timeout,
    Fail(&'static str),
}

/// A [`MessageReader`] replaying a fixed script, then returning `Eof`.
pub struct ScriptedReader {
    steps: VecDeque<Step>,
    closed: Arc<AtomicBool>,
}

impl ScriptedReader {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn lines(lines: &[&'static str]) -> Self {
        Self::new(lines.iter().copied().map(Step::Line))
    }

    /// A flag set once the reader is closed.
    pub fn closed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl MessageReader for ScriptedReader {
    async fn next(&mut self) -> Result<Message, ReadError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ReadError::Eof);
            }
            match self.steps.pop_front() {
                Some(Step::Line(line)) => return Ok(Message::new(line, line.len())),
                Some(Step::Empty(bytes)) => return Ok(Message::new("", bytes)),
                Some(Step::Wait(duration)) => tokio::time::sleep(duration).await,
                Some(Step::Timeout) => return Err(ReadError::Timeout),
                Some(Step::Fail(reason)) => {
                    return Err(io::Error::new(io::ErrorKind::Other, reason).into())
                }
                None => return Err(ReadError::Eof),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ReadError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Reads messages until the first error, which is returned alongside them.
pub async fn collect<R: MessageReader + ?Sized>(reader: &mut R) -> (Vec<Message>, ReadError) {
    let mut messages = Vec::new();
    loop {
        match reader.next().await {
            Ok(message) => messages.push(message),
            Err(error) => return (messages, error),
        }
    }
}

/// The content of `messages` as strings.
pub fn contents(messages: &[Message]) -> Vec<String> {
    messages
        .iter()
        .map(|message| String::from_utf8_lossy(&message.content).into_owned())
        .collect()
}
