use std::sync::Mutex;

/// Receives inference failures. Failures are reported, never retried.
pub trait ErrorSink: Send + Sync {
    fn report(&self, sequence: u64, message: &str);
}

/// Writes failures to the log.
#[derive(Clone, Debug, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, sequence: u64, message: &str) {
        log::error!("face mesh error (frame {}): {}", sequence, message);
    }
}

/// Keeps failures in memory, and logs them as well.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    errors: Mutex<Vec<(u64, String)>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<(u64, String)> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, sequence: u64, message: &str) {
        LogErrorSink.report(sequence, message);
        match self.errors.lock() {
            Ok(mut errors) => errors.push((sequence, message.to_string())),
            Err(_) => log::error!("error sink lock poisoned; dropping error for frame {}", sequence),
        }
    }
}
