//! Console output for the command line tool
//!
//! Diagnostics go through `tracing`; this module prints the user-facing
//! lines: push progress, the final summary and errors.

use crate::upload::{ProgressEvent, ProgressSink};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct OutputManager {
    pub verbose: bool,
    quiet: bool,
    start_time: Instant,
}

impl OutputManager {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    pub fn detail(&self, detail: &str) {
        if self.verbose {
            println!("      📝 {}", detail);
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("SUCCESS", message, "✅");
        }
    }

    pub fn warning(&self, message: &str) {
        self.print_with_timestamp("WARN", message, "⚠️");
    }

    pub fn error(&self, message: &str) {
        eprintln!("❌ {}", message);
    }

    pub fn section(&self, title: &str) {
        if self.quiet {
            return;
        }

        if self.verbose {
            let separator = "━".repeat(60);
            println!("\n{}", separator);
            println!("📋 {}", title);
            println!("{}", separator);
        } else {
            println!("\n📋 {}", title);
        }
    }

    pub fn summary(&self, title: &str, items: &[(&str, String)]) {
        if self.quiet {
            return;
        }

        println!("\n📊 {}", title);
        for (key, value) in items {
            println!("  • {}: {}", key, value);
        }
    }

    pub fn elapsed_time(&self) -> String {
        format_duration(self.start_time.elapsed())
    }

    fn print_with_timestamp(&self, level: &str, message: &str, emoji: &str) {
        if self.verbose {
            let timestamp = format!("[{:8.3}s]", self.start_time.elapsed().as_secs_f64());
            println!("{} {} {} {}", timestamp, emoji, level, message);
        } else {
            println!("{} {}", emoji, message);
        }
    }

    fn render(&self, event: &ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::BlobSkipped { .. } if !self.verbose => None,
            ProgressEvent::BlobUploading { .. } if !self.verbose => None,
            ProgressEvent::BlobSkipped { size, .. }
            | ProgressEvent::BlobUploading { size, .. }
            | ProgressEvent::BlobUploaded { size, .. } => {
                Some(format!("{} ({})", event, format_size(*size)))
            }
            ProgressEvent::ManifestPushed { .. } => Some(event.to_string()),
        }
    }
}

impl ProgressSink for OutputManager {
    fn report(&self, event: &ProgressEvent) {
        if self.quiet {
            return;
        }
        if let Some(line) = self.render(event) {
            match event {
                ProgressEvent::ManifestPushed { .. } => self.success(&line),
                _ => println!("  ⏳ {}", line),
            }
        }
    }
}

pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
