//! Interactive input seam.
//!
//! Steps with an `input` block need an answer from outside the engine.
//! Rather than blocking a runtime thread on a console read, the step
//! suspends on [`InputProvider::read`] and resumes when the future
//! resolves. Embedders decide where answers come from: a queue in
//! tests, a channel bridged to a UI or socket in applications. When no
//! provider is configured the step fails cleanly instead of hanging.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from interactive input.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("no interactive input source is configured")]
    Unavailable,

    #[error("input source closed before answering")]
    Closed,
}

// ---------------------------------------------------------------------------
// InputProvider trait
// ---------------------------------------------------------------------------

/// Answers one question from a suspended step.
pub trait InputProvider: Send + Sync {
    /// Resolve the user-facing question to an answer. The returned
    /// future may stay pending for as long as the answer takes; the
    /// step is suspended, not a thread.
    fn read<'a>(
        &'a self,
        question: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, InputError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Default provider: fails every read.
#[derive(Debug, Default, Clone)]
pub struct UnavailableInputProvider;

impl InputProvider for UnavailableInputProvider {
    fn read<'a>(
        &'a self,
        _question: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, InputError>> + Send + 'a>> {
        Box::pin(async { Err(InputError::Unavailable) })
    }
}

/// Pre-loaded answers, popped in order. For tests and batch runs.
#[derive(Debug, Default)]
pub struct QueuedInputProvider {
    answers: Mutex<VecDeque<String>>,
}

impl QueuedInputProvider {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }
}

impl InputProvider for QueuedInputProvider {
    fn read<'a>(
        &'a self,
        _question: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, InputError>> + Send + 'a>> {
        Box::pin(async {
            self.answers
                .lock()
                .map_err(|_| InputError::Closed)?
                .pop_front()
                .ok_or(InputError::Closed)
        })
    }
}

/// One question awaiting an out-of-band answer.
#[derive(Debug)]
pub struct InputRequest {
    /// The question text, with the current prompt already substituted.
    pub question: String,
    /// Send the answer here to resume the suspended step.
    pub respond: oneshot::Sender<String>,
}

/// Bridges reads to an `mpsc` channel of [`InputRequest`]s.
///
/// The embedding application drains the receiver however it likes (UI
/// prompt, socket, operator console) and answers through the enclosed
/// oneshot. Dropping the receiver or the oneshot fails the pending read
/// with [`InputError::Closed`].
#[derive(Clone)]
pub struct ChannelInputProvider {
    requests: mpsc::Sender<InputRequest>,
}

impl ChannelInputProvider {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<InputRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { requests: tx }, rx)
    }
}

impl InputProvider for ChannelInputProvider {
    fn read<'a>(
        &'a self,
        question: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, InputError>> + Send + 'a>> {
        Box::pin(async move {
            let (respond, answer) = oneshot::channel();
            self.requests
                .send(InputRequest {
                    question: question.to_string(),
                    respond,
                })
                .await
                .map_err(|_| InputError::Closed)?;
            answer.await.map_err(|_| InputError::Closed)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
