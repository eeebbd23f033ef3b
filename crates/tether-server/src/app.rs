//! Application-facing callbacks.
//!
//! The embedding application supplies a [`ConnectionFactory`]; the router
//! asks it for one [`Connection`] per session. The session invokes the
//! callbacks with no internal lock held, so a callback may freely call back
//! into the session (`send`, `close`) or into other sessions.

use std::sync::Arc;

use crate::session::{ConnectionInfo, Session};

/// Error type an application callback may fail with.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Per-session application handler.
pub trait Connection: Send + Sync {
    /// The session transitioned to open; called once.
    fn on_open(&self, session: &Arc<Session>, info: &ConnectionInfo) {
        let _ = (session, info);
    }

    /// One inbound message, in arrival order.
    ///
    /// Returning an error closes the session with
    /// [`CloseReason::SERVER_ERROR`](tether_core::CloseReason::SERVER_ERROR).
    fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), AppError>;

    /// The session closed after having been opened; called once.
    fn on_close(&self, session: &Arc<Session>) {
        let _ = session;
    }
}

/// Creates a [`Connection`] for every new session.
pub trait ConnectionFactory: Send + Sync {
    /// Build the handler for a new session.
    fn create(&self) -> Box<dyn Connection>;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> Box<dyn Connection> + Send + Sync,
{
    fn create(&self) -> Box<dyn Connection> {
        self()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording application used by unit tests across the crate.

    use super::*;
    use parking_lot::Mutex;

    /// Everything a [`Recorder`] connection observed.
    #[derive(Default)]
    pub struct Journal {
        pub opened: Mutex<Vec<ConnectionInfo>>,
        pub messages: Mutex<Vec<String>>,
        pub closed: Mutex<u32>,
    }

    /// Records callbacks; echoes messages when `echo` is set and fails on
    /// the message `"boom"`.
    pub struct Recorder {
        pub journal: Arc<Journal>,
        pub echo: bool,
    }

    impl Connection for Recorder {
        fn on_open(&self, _session: &Arc<Session>, info: &ConnectionInfo) {
            self.journal.opened.lock().push(info.clone());
        }

        fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), AppError> {
            if message == "boom" {
                return Err("boom".into());
            }
            if self.echo {
                session.send(&message)?;
            }
            self.journal.messages.lock().push(message);
            Ok(())
        }

        fn on_close(&self, _session: &Arc<Session>) {
            *self.journal.closed.lock() += 1;
        }
    }

    /// Factory producing [`Recorder`]s that share one journal.
    pub fn recorder_factory(echo: bool) -> (Arc<dyn ConnectionFactory>, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let shared = journal.clone();
        let factory = move || -> Box<dyn Connection> {
            Box::new(Recorder {
                journal: shared.clone(),
                echo,
            })
        };
        (Arc::new(factory), journal)
    }
}
