//! Progress tracking for migration runs.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::types::EntityKind;

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current phase of the run.
    pub phase: MigrationPhase,

    /// Natural key of the entity just processed.
    pub current_item: Option<String>,

    /// Items completed in current phase.
    pub completed: u64,

    /// Total items in current phase, 0 when unknown.
    pub total: u64,

    /// Optional message.
    pub message: Option<String>,
}

/// Phases of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Checking both platforms.
    Initializing,
    /// Migrating users.
    MigratingUsers,
    /// Migrating groups into organizations.
    MigratingGroups,
    /// Migrating projects into repositories.
    MigratingProjects,
    /// Migrating project wikis.
    MigratingWikis,
    /// Migrating SSH keys.
    MigratingSshKeys,
    /// Verifying migrated entities.
    Verifying,
    /// Run complete.
    Complete,
}

impl MigrationPhase {
    const ALL: [MigrationPhase; 8] = [
        MigrationPhase::Initializing,
        MigrationPhase::MigratingUsers,
        MigrationPhase::MigratingGroups,
        MigrationPhase::MigratingProjects,
        MigrationPhase::MigratingWikis,
        MigrationPhase::MigratingSshKeys,
        MigrationPhase::Verifying,
        MigrationPhase::Complete,
    ];

    /// Phase in which `kind` is processed.
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::User => Self::MigratingUsers,
            EntityKind::Group => Self::MigratingGroups,
            EntityKind::Project => Self::MigratingProjects,
            EntityKind::Wiki => Self::MigratingWikis,
            EntityKind::SshKey => Self::MigratingSshKeys,
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing"),
            Self::MigratingUsers => write!(f, "Migrating users"),
            Self::MigratingGroups => write!(f, "Migrating groups"),
            Self::MigratingProjects => write!(f, "Migrating projects"),
            Self::MigratingWikis => write!(f, "Migrating wikis"),
            Self::MigratingSshKeys => write!(f, "Migrating SSH keys"),
            Self::Verifying => write!(f, "Verifying migration"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// Progress tracker for migration runs.
pub struct MigrationProgress {
    phase: AtomicU8,
    completed: AtomicU64,
    total: AtomicU64,
    callback: Option<Arc<ProgressCallback>>,
}

impl MigrationProgress {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(0),
            completed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Create a progress tracker with a callback.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            ..Self::new()
        }
    }

    /// Set the current phase.
    pub fn set_phase(&self, phase: MigrationPhase, total: u64) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.notify(None, None);
    }

    /// Increment progress.
    pub fn increment(&self, item: Option<&str>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify(item.map(|s| s.to_string()), None);
    }

    /// Set a message.
    pub fn message(&self, msg: &str) {
        self.notify(None, Some(msg.to_string()));
    }

    /// Items completed in the current phase.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Get current progress percentage.
    pub fn percentage(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed.load(Ordering::SeqCst);
        (completed as f64 / total as f64) * 100.0
    }

    /// Get current phase.
    pub fn current_phase(&self) -> MigrationPhase {
        let index = self.phase.load(Ordering::SeqCst) as usize;
        MigrationPhase::ALL
            .get(index)
            .copied()
            .unwrap_or(MigrationPhase::Complete)
    }

    fn notify(&self, current_item: Option<String>, message: Option<String>) {
        if let Some(callback) = &self.callback {
            let update = ProgressUpdate {
                phase: self.current_phase(),
                current_item,
                completed: self.completed.load(Ordering::SeqCst),
                total: self.total.load(Ordering::SeqCst),
                message,
            };
            callback(update);
        }
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Console progress reporter using indicatif.
pub struct ConsoleProgressReporter {
    progress_bar: indicatif::ProgressBar,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter.
    ///
    /// Listings are streamed, so totals are unknown and a spinner with a
    /// running count is shown instead of a bar.
    pub fn new() -> Self {
        let progress_bar = indicatif::ProgressBar::new_spinner();
        let style = indicatif::ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {pos:>6} {msg}",
        )
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner());
        progress_bar.set_style(style);
        progress_bar.enable_steady_tick(std::time::Duration::from_millis(120));

        Self { progress_bar }
    }

    /// Create a progress callback for use with the driver.
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.progress_bar.clone();
        Box::new(move |update: ProgressUpdate| {
            pb.set_position(update.completed);

            let mut msg = update.phase.to_string();
            if let Some(item) = &update.current_item {
                msg = format!("{msg}: {item}");
            }
            if let Some(message) = &update.message {
                msg = format!("{msg} - {message}");
            }
            pb.set_message(msg);
        })
    }

    /// Finish the progress bar.
    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracker() {
        let progress = MigrationProgress::new();

        progress.set_phase(MigrationPhase::MigratingProjects, 10);
        assert_eq!(progress.current_phase(), MigrationPhase::MigratingProjects);
        assert_eq!(progress.percentage(), 0.0);

        progress.increment(Some("eng/api"));
        assert!((progress.percentage() - 10.0).abs() < 0.01);

        for _ in 0..9 {
            progress.increment(None);
        }
        assert!((progress.percentage() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_phase_round_trips_through_atomic() {
        let progress = MigrationProgress::new();
        for kind in EntityKind::ALL {
            progress.set_phase(MigrationPhase::for_kind(kind), 0);
            assert_eq!(progress.current_phase(), MigrationPhase::for_kind(kind));
        }
        progress.set_phase(MigrationPhase::Complete, 0);
        assert_eq!(progress.current_phase(), MigrationPhase::Complete);
    }

    #[test]
    fn test_progress_with_callback() {
        use std::sync::atomic::AtomicUsize;
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let progress = MigrationProgress::with_callback(Box::new(move |_| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        progress.set_phase(MigrationPhase::MigratingUsers, 0);
        progress.increment(Some("alice"));
        progress.increment(Some("bob"));

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
        assert_eq!(progress.completed(), 2);
    }
}
