//! Transfer progress display with progress bars.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use missionlink_core::{TransferEvent, TransferKind};
use std::time::Duration;

/// Item transfer progress tracker
pub struct ItemProgress {
    bar: ProgressBar,
}

impl ItemProgress {
    /// Create a new progress tracker
    ///
    /// The length is unknown for downloads until the vehicle reports its
    /// item count.
    #[must_use]
    pub fn new(kind: TransferKind, total_items: Option<u16>) -> Self {
        let bar = ProgressBar::new(u64::from(total_items.unwrap_or(0)));

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} items")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message(format!("Mission {kind}"));

        Self { bar }
    }

    /// Update from a transfer event; returns true once the transfer ended
    pub fn observe(&self, event: &TransferEvent) -> bool {
        match event {
            TransferEvent::Progress { done, total, .. } => {
                self.bar.set_length(u64::from(*total));
                self.bar.set_position(u64::from(*done));
                false
            }
            TransferEvent::Completed { kind, item_count } => {
                self.bar.set_length(u64::from(*item_count));
                self.bar.set_position(u64::from(*item_count));
                self.bar.finish_with_message(format!(
                    "{} mission {kind} of {item_count} items",
                    style("Completed").green().bold()
                ));
                true
            }
            TransferEvent::Failed { code, detail, .. } => {
                self.bar.abandon_with_message(format!(
                    "{} {code}: {detail}",
                    style("Failed").red().bold()
                ));
                true
            }
            TransferEvent::StateChanged { .. } => false,
        }
    }
}

/// Format duration in human-readable format
///
/// # Example
///
/// ```ignore
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
