//! Cooperative stop signals, polled by the trainer once per epoch or round.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// External stop condition.
///
/// `update` refreshes the flags; `pre_sig` and `adv_sig` report whether the
/// pretraining and adversarial phases should keep running (`true` = run).
pub trait StopSignal {
    fn update(&mut self);
    fn pre_sig(&self) -> bool;
    fn adv_sig(&self) -> bool;
}

/// Never stops.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRun;

impl StopSignal for AlwaysRun {
    fn update(&mut self) {}

    fn pre_sig(&self) -> bool {
        true
    }

    fn adv_sig(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct SignalFlags {
    pre_sig: Option<bool>,
    adv_sig: Option<bool>,
}

/// Reads `{"pre_sig": bool, "adv_sig": bool}` from a JSON file on each update.
///
/// A missing file or key means keep running. An unreadable file keeps the
/// previous flags.
#[derive(Debug, Clone)]
pub struct FileSignal {
    path: PathBuf,
    pre_sig: bool,
    adv_sig: bool,
}

impl FileSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pre_sig: true,
            adv_sig: true,
        }
    }
}

impl StopSignal for FileSignal {
    fn update(&mut self) {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.pre_sig = true;
                self.adv_sig = true;
                return;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read signal file");
                return;
            }
        };
        match serde_json::from_str::<SignalFlags>(&text) {
            Ok(flags) => {
                self.pre_sig = flags.pre_sig.unwrap_or(true);
                self.adv_sig = flags.adv_sig.unwrap_or(true);
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Malformed signal file ignored");
            }
        }
    }

    fn pre_sig(&self) -> bool {
        self.pre_sig
    }

    fn adv_sig(&self) -> bool {
        self.adv_sig
    }
}

/// Stops every phase once a wall-clock budget has elapsed.
#[derive(Debug, Clone)]
pub struct DeadlineSignal {
    deadline: Instant,
    expired: bool,
}

impl DeadlineSignal {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            expired: false,
        }
    }
}

impl StopSignal for DeadlineSignal {
    fn update(&mut self) {
        if !self.expired && Instant::now() >= self.deadline {
            tracing::info!("Wall-clock budget exhausted");
            self.expired = true;
        }
    }

    fn pre_sig(&self) -> bool {
        !self.expired
    }

    fn adv_sig(&self) -> bool {
        !self.expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_run() {
        let mut sig = AlwaysRun;
        sig.update();
        assert!(sig.pre_sig() && sig.adv_sig());
    }

    #[test]
    fn test_file_signal_missing_file_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut sig = FileSignal::new(dir.path().join("absent.json"));
        sig.update();
        assert!(sig.pre_sig());
        assert!(sig.adv_sig());
    }

    #[test]
    fn test_file_signal_reads_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal.json");
        let mut sig = FileSignal::new(&path);

        std::fs::write(&path, r#"{"pre_sig": false}"#).unwrap();
        sig.update();
        assert!(!sig.pre_sig());
        assert!(sig.adv_sig());

        std::fs::write(&path, r#"{"pre_sig": true, "adv_sig": false}"#).unwrap();
        sig.update();
        assert!(sig.pre_sig());
        assert!(!sig.adv_sig());
    }

    #[test]
    fn test_file_signal_malformed_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal.json");
        let mut sig = FileSignal::new(&path);
        std::fs::write(&path, r#"{"adv_sig": false}"#).unwrap();
        sig.update();
        std::fs::write(&path, "not json").unwrap();
        sig.update();
        assert!(!sig.adv_sig());
    }

    #[test]
    fn test_deadline_signal() {
        let mut open = DeadlineSignal::new(Duration::from_secs(3600));
        open.update();
        assert!(open.pre_sig() && open.adv_sig());

        let mut expired = DeadlineSignal::new(Duration::ZERO);
        expired.update();
        assert!(!expired.pre_sig());
        assert!(!expired.adv_sig());
    }
}
