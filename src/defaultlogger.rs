//! Console output for a build: messages on stdout stamped with the time
//! since the messenger was installed, and indicatif bars for the partition
//! phases, archive writes and resolver batches.

use indicatif::{ProgressBar, ProgressStyle};

use crate::logging::{set_boxed_messenger, Messenger, ProgressBytes, ProgressPercent, TaskSequence};
use crate::message;
use crate::utils::Result;

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

const PHASE_TEMPLATE: &str =
    "[{elapsed_precise}] [{bar:60.cyan/blue}] {percent:>3}% {msg}";
const BYTES_TEMPLATE: &str =
    "[{elapsed_precise}] [{bar:60.cyan/blue}] {bytes} / {total_bytes} {bytes_per_sec} {msg}";
const BATCH_TEMPLATE: &str =
    "[{elapsed_precise}] [{bar:60.green/white}] batch {pos}/{len} {msg}";

fn console_bar(show: bool, len: u64, template: &str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(ProgressStyle::default_bar().template(template).progress_chars("=> "));
    pb
}

/// Stamps the first line of `msg` with `secs`, and indents the rest to
/// match.
fn stamp_lines(secs: f64, msg: &str) -> String {
    let stamp = format!("{:8.1}s", secs);
    let mut res = String::new();
    for (i, l) in msg.split('\n').enumerate() {
        if i > 0 {
            res.push('\n');
            res.push_str(&" ".repeat(stamp.len()));
        } else {
            res.push_str(&stamp);
        }
        res.push(' ');
        res.push_str(l);
    }
    res
}

/// Percentage bar for the partition phases (nodes, ways, relations, then
/// the deferred relation loop).
pub struct PhaseBar {
    pb: ProgressBar,
}

impl ProgressPercent for PhaseBar {
    fn change_message(&self, new_message: &str) {
        self.pb.set_message(new_message);
    }

    fn progress_percent(&self, percent: f64) {
        self.pb.set_position((percent * 10.0) as u64);
    }

    fn finish(&self) {
        self.pb.finish();
    }
}

/// Byte count bar for archive and pile data written out.
pub struct BytesBar {
    pb: ProgressBar,
}

impl ProgressBytes for BytesBar {
    fn change_message(&self, new_message: &str) {
        self.pb.set_message(new_message);
    }

    fn progress_bytes(&self, bytes: u64) {
        self.pb.set_position(bytes);
    }

    fn finish(&self) {
        self.pb.finish();
    }
}

struct BatchLog {
    label: String,
    num_batches: usize,
    durations: Vec<(String, f64)>,
    current: Option<(String, Instant)>,
}

impl BatchLog {
    fn new(label: &str, num_batches: usize) -> BatchLog {
        BatchLog {
            label: String::from(label),
            num_batches,
            durations: Vec::with_capacity(num_batches),
            current: None,
        }
    }

    fn close_current(&mut self) {
        if let Some((name, started)) = self.current.take() {
            self.durations.push((name, started.elapsed().as_secs_f64()));
        }
    }

    fn start(&mut self, name: &str) {
        self.close_current();
        self.current = Some((String::from(name), Instant::now()));
    }

    fn slowest(&self) -> Option<&(String, f64)> {
        self.durations
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    fn summary(&self) -> String {
        let total: f64 = self.durations.iter().map(|(_, t)| t).sum();
        let mut s = format!(
            "{}: {} of {} batches in {:.1}s",
            self.label,
            self.durations.len(),
            self.num_batches,
            total
        );
        if let Some((name, t)) = self.slowest() {
            s += &format!(", slowest {} ({:.1}s)", name, t);
        }
        s
    }
}

/// Resolver batches: one bar step per batch, and a timing summary when the
/// sequence finishes.
pub struct BatchSequence {
    log: Mutex<BatchLog>,
    pb: ProgressBar,
}

impl BatchSequence {
    fn log(&self) -> MutexGuard<'_, BatchLog> {
        match self.log.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TaskSequence for BatchSequence {
    fn start_task(&self, msg: &str) {
        let mut log = self.log();
        if log.current.is_some() {
            self.pb.inc(1);
        }
        log.start(msg);
        self.pb.set_message(msg);
    }

    fn finish(&self) {
        let mut log = self.log();
        log.close_current();
        self.pb.set_position(log.durations.len() as u64);
        self.pb.finish_and_clear();
        message!("{}", log.summary());
    }
}

/// Messenger for interactive builds. With `bars` unset only the messages
/// are printed.
pub struct BuildMessenger {
    started: Instant,
    bars: bool,
}

impl BuildMessenger {
    pub fn new(bars: bool) -> BuildMessenger {
        BuildMessenger {
            started: Instant::now(),
            bars,
        }
    }
}

impl Messenger for BuildMessenger {
    fn message(&self, message: &str) {
        println!("{}", stamp_lines(self.started.elapsed().as_secs_f64(), message));
    }

    fn start_progress_percent(&self, message: &str) -> Box<dyn ProgressPercent> {
        let pb = console_bar(self.bars, 1000, PHASE_TEMPLATE);
        pb.set_message(message);
        Box::new(PhaseBar { pb })
    }

    fn start_progress_bytes(&self, message: &str, total_bytes: u64) -> Box<dyn ProgressBytes> {
        let pb = console_bar(self.bars, total_bytes, BYTES_TEMPLATE);
        pb.set_message(message);
        Box::new(BytesBar { pb })
    }

    fn start_task_sequence(&self, message: &str, num_tasks: usize) -> Box<dyn TaskSequence> {
        Box::new(BatchSequence {
            log: Mutex::new(BatchLog::new(message, num_tasks)),
            pb: console_bar(self.bars, num_tasks as u64, BATCH_TEMPLATE),
        })
    }
}

/// Installs a `BuildMessenger` as the global messenger. Fails if a
/// messenger is already installed.
pub fn register_build_messenger(bars: bool) -> Result<()> {
    set_boxed_messenger(Box::new(BuildMessenger::new(bars)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_lines() {
        assert_eq!(stamp_lines(3.0, "resolve"), "     3.0s resolve");
        assert_eq!(
            stamp_lines(12.0, "3 tiles\n0 unresolved"),
            "    12.0s 3 tiles\n          0 unresolved"
        );
    }

    #[test]
    fn test_batch_sequence() {
        let ts = BatchSequence {
            log: Mutex::new(BatchLog::new("resolve 21 piles", 3)),
            pb: ProgressBar::hidden(),
        };
        ts.start_task("zoom 2 (even,even): 4 piles");
        ts.start_task("zoom 2 (odd,even): 4 piles");
        {
            let log = ts.log();
            assert_eq!(log.durations.len(), 1);
            assert_eq!(log.durations[0].0, "zoom 2 (even,even): 4 piles");
            assert_eq!(log.current.as_ref().map(|c| c.0.as_str()), Some("zoom 2 (odd,even): 4 piles"));
        }
        ts.finish();

        let log = ts.log();
        assert!(log.current.is_none());
        assert_eq!(log.durations.len(), 2);
        assert!(log.summary().starts_with("resolve 21 piles: 2 of 3 batches in "));
        assert!(log.summary().contains(", slowest zoom 2 ("));
    }

    #[test]
    fn test_hidden_bars() {
        let m = BuildMessenger::new(false);
        let pc = m.start_progress_percent("partition 21 piles");
        pc.progress_percent(33.3);
        pc.change_message("ways");
        pc.finish();
        let pb = m.start_progress_bytes("write out.tiles", 100);
        pb.progress_bytes(60);
        pb.finish();
        assert_eq!(BatchLog::new("resolve", 0).summary(), "resolve: 0 of 0 batches in 0.0s");
    }
}
