use std::sync::atomic::{AtomicUsize, Ordering};

use crate::utils::{Error, Result};

static mut MESSENGER: &dyn Messenger = &NopMessenger;

static STATE: AtomicUsize = AtomicUsize::new(0);

pub fn set_messenger(logger: &'static dyn Messenger) -> Result<()> {
    set_messenger_inner(|| logger)
}

pub fn set_boxed_messenger(logger: Box<dyn Messenger>) -> Result<()> {
    set_messenger_inner(|| Box::leak(logger))
}

fn set_messenger_error() -> Result<()> {
    Err(Error::InvalidInput(String::from("failed to set messenger")))
}

fn set_messenger_inner<F>(make_logger: F) -> Result<()>
where
    F: FnOnce() -> &'static dyn Messenger,
{
    let old_state = match STATE.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(s) | Err(s) => s,
    };
    match old_state {
        0 => {
            unsafe {
                MESSENGER = make_logger();
            }
            STATE.store(2, Ordering::SeqCst);
            Ok(())
        }
        1 => {
            while STATE.load(Ordering::SeqCst) == 1 {
                std::hint::spin_loop();
            }
            set_messenger_error()
        }
        _ => set_messenger_error(),
    }
}

pub fn messenger() -> &'static dyn Messenger {
    if STATE.load(Ordering::SeqCst) != 2 {
        static NOP: NopMessenger = NopMessenger;
        &NOP
    } else {
        unsafe { MESSENGER }
    }
}

pub trait ProgressPercent {
    fn change_message(&self, new_message: &str);
    fn progress_percent(&self, percent: f64);
    fn finish(&self);
}

pub trait ProgressBytes {
    fn change_message(&self, new_message: &str);
    fn progress_bytes(&self, bytes: u64);
    fn finish(&self);
}

pub trait TaskSequence {
    fn start_task(&self, message: &str);
    fn finish(&self);
}

pub trait Messenger: Sync + Send {
    fn message(&self, message: &str);

    fn start_progress_percent(&self, message: &str) -> Box<dyn ProgressPercent>;
    fn start_progress_bytes(&self, message: &str, total_bytes: u64) -> Box<dyn ProgressBytes>;
    fn start_task_sequence(&self, message: &str, num_tasks: usize) -> Box<dyn TaskSequence>;
}

struct NopProgress;
impl ProgressPercent for NopProgress {
    fn change_message(&self, _new_message: &str) {}
    fn progress_percent(&self, _percent: f64) {}
    fn finish(&self) {}
}
impl ProgressBytes for NopProgress {
    fn change_message(&self, _new_message: &str) {}
    fn progress_bytes(&self, _bytes: u64) {}
    fn finish(&self) {}
}
impl TaskSequence for NopProgress {
    fn start_task(&self, _message: &str) {}
    fn finish(&self) {}
}

struct NopMessenger;
impl Messenger for NopMessenger {
    fn message(&self, _message: &str) {}

    fn start_progress_percent(&self, _message: &str) -> Box<dyn ProgressPercent> {
        Box::new(NopProgress)
    }
    fn start_progress_bytes(&self, _message: &str, _total_bytes: u64) -> Box<dyn ProgressBytes> {
        Box::new(NopProgress)
    }
    fn start_task_sequence(&self, _message: &str, _num_tasks: usize) -> Box<dyn TaskSequence> {
        Box::new(NopProgress)
    }
}

#[macro_export]
macro_rules! message {
    ($($arg:tt)*) => {
        $crate::logging::messenger().message(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! progress_percent {
    ($($arg:tt)*) => {
        $crate::logging::messenger().start_progress_percent(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! task_sequence {
    ($num_tasks:expr, $($arg:tt)*) => {
        $crate::logging::messenger().start_task_sequence(&format!($($arg)*), $num_tasks)
    };
}
