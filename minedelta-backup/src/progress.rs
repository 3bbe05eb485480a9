//! Progress reporting.
//!
//! Long running operations describe what they are doing through a [`Progress`]
//! sink. Messages are meant for humans; nothing should parse them.

pub trait Progress {
    fn report(&self, message: &str);
}

impl<F> Progress for F
where
    F: Fn(&str),
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _message: &str) {}
}

/// Forwards messages to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn report(&self, message: &str) {
        log::info!("{message}");
    }
}
