//! Process-wide sinks for codec messages, and the guard every codec call runs in.
//!
//! Codecs push text fragments with [`MessageSink::put_text`] and end a
//! message with [`MessageSink::flush`]. Fragments are buffered per thread so
//! worker threads reporting at the same time do not interleave. Flushing the
//! error sink returns an error the codec must propagate with `?`; that is the
//! only way out of a failing codec call.

use crate::error::{BridgeError, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::thread::{self, ThreadId};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Error,
    Warning,
}

pub struct MessageSink {
    kind: MessageKind,
    pending: Mutex<HashMap<ThreadId, String>>,
}

impl MessageSink {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn put_text(&self, text: &str) {
        self.pending
            .lock()
            .entry(thread::current().id())
            .or_default()
            .push_str(text);
    }

    /// Without `end_of_message` this only marks a fragment boundary.
    ///
    /// At end of message the warning sink logs and clears its buffer; the
    /// error sink logs and returns [`BridgeError::Codec`].
    pub fn flush(&self, end_of_message: bool) -> Result<()> {
        if !end_of_message {
            return Ok(());
        }
        let text = self
            .pending
            .lock()
            .remove(&thread::current().id())
            .unwrap_or_default();
        let text = text.trim_end().to_owned();
        match self.kind {
            MessageKind::Warning => {
                if !text.is_empty() {
                    warn!(target: "j2kbridge::codec", "{text}");
                }
                Ok(())
            }
            MessageKind::Error => {
                error!(target: "j2kbridge::codec", "{text}");
                Err(BridgeError::Codec { message: text })
            }
        }
    }

    /// Drop anything the current thread has buffered.
    pub fn discard(&self) {
        self.pending.lock().remove(&thread::current().id());
    }

    /// Drop the buffers of threads that will never flush again. Returns how
    /// many were dropped.
    pub fn forget_threads(&self, threads: &[ThreadId]) -> usize {
        let mut pending = self.pending.lock();
        threads
            .iter()
            .filter(|id| pending.remove(*id).is_some())
            .count()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self, thread: ThreadId) -> bool {
        self.pending.lock().contains_key(&thread)
    }
}

pub struct Messages {
    pub error: MessageSink,
    pub warning: MessageSink,
}

impl Messages {
    /// Forget `threads` in both sinks.
    pub fn forget_threads(&self, threads: &[ThreadId]) -> usize {
        self.error.forget_threads(threads) + self.warning.forget_threads(threads)
    }
}

static MESSAGES: OnceLock<Messages> = OnceLock::new();

/// The sinks, installed on first use.
pub fn messages() -> &'static Messages {
    MESSAGES.get_or_init(|| Messages {
        error: MessageSink::new(MessageKind::Error),
        warning: MessageSink::new(MessageKind::Warning),
    })
}

/// Shorthand for a one-line codec error.
pub fn raise(text: &str) -> Result<()> {
    let sinks = messages();
    sinks.error.put_text(text);
    sinks.error.flush(true)
}

/// Shorthand for a one-line codec warning.
pub fn warn_once(text: &str) {
    let sinks = messages();
    sinks.warning.put_text(text);
    // Warning flush never fails.
    let _ = sinks.warning.flush(true);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Run one codec call. A panic inside becomes [`BridgeError::CodecPanic`]
/// instead of unwinding through the host.
pub fn guard<T>(operation: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            messages().error.discard();
            Err(err)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            messages().error.discard();
            error!(operation, %message, "codec panicked");
            Err(BridgeError::CodecPanic { operation, message })
        }
    }
}
