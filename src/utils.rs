use std::fmt;

use chrono::NaiveDateTime;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    InvalidInput(String),
    InvalidData(String),
    PileStore(String),
    Worker(String),
}

impl std::error::Error for Error {}

impl std::convert::From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl std::convert::From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Csv(e)
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn as_secs(dur: std::time::Duration) -> f64 {
    (dur.as_secs() as f64) * 1.0 + (dur.subsec_nanos() as f64) * 0.000000001
}

pub struct Timer(std::time::Instant);

impl Timer {
    pub fn new() -> Timer {
        Timer(std::time::Instant::now())
    }

    pub fn since(&self) -> f64 {
        as_secs(self.0.elapsed())
    }

    pub fn reset(&mut self) {
        self.0 = std::time::Instant::now();
    }
}

pub struct ThreadTimer(cpu_time::ThreadTime);

impl ThreadTimer {
    pub fn new() -> ThreadTimer {
        ThreadTimer(cpu_time::ThreadTime::now())
    }

    pub fn since(&self) -> f64 {
        as_secs(self.0.elapsed())
    }
}

pub struct LogTimes {
    pub timer: Timer,
    pub msgs: Vec<(String, f64)>,
    pub longest: usize,
}
impl LogTimes {
    pub fn new() -> LogTimes {
        LogTimes {
            timer: Timer::new(),
            msgs: Vec::new(),
            longest: 6,
        }
    }
    pub fn add(&mut self, msg: &str) {
        self.longest = usize::max(self.longest, msg.len());
        self.msgs.push((String::from(msg), self.timer.since()));
        self.timer.reset();
    }
    pub fn total(&self) -> f64 {
        self.msgs.iter().map(|(_, b)| *b).sum()
    }
}

impl fmt::Display for LogTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tot = 0.0;
        let mut others = 0.0;
        for (a, b) in &self.msgs {
            if *b > 0.1 {
                write!(
                    f,
                    "{}:{}{:6.2}s\n",
                    a,
                    " ".repeat(self.longest - a.len()),
                    b
                )?;
            } else {
                others += b;
            }
            tot += b;
        }
        if others > 0.0 {
            write!(f, "OTHERS:{}{:6.2}s\n", " ".repeat(self.longest - 6), others)?;
        }
        write!(f, "TOTAL:{}{:6.2}s", " ".repeat(self.longest - 5), tot)
    }
}

/// Per-worker timings, merged at a batch barrier.
#[derive(Debug, Default, Clone)]
pub struct Timings {
    pub timings: Vec<(String, f64)>,
}

impl Timings {
    pub fn new() -> Timings {
        Timings {
            timings: Vec::new(),
        }
    }
    pub fn add(&mut self, msg: &str, tm: f64) {
        self.timings.push((String::from(msg), tm));
    }

    pub fn combine(&mut self, other: Timings) {
        for (a, b) in other.timings {
            match self.timings.iter_mut().find(|(x, _)| x == &a) {
                Some(p) => {
                    p.1 += b;
                }
                None => {
                    self.timings.push((a, b));
                }
            }
        }
    }
}

impl fmt::Display for Timings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (a, b)) in self.timings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {:0.1}s", a, b)?;
        }
        Ok(())
    }
}

pub(crate) struct Checktime {
    st: Timer,
    lt: Timer,
    thres: f64,
}

impl Checktime {
    pub fn with_threshold(thres: f64) -> Checktime {
        Checktime {
            st: Timer::new(),
            lt: Timer::new(),
            thres: thres,
        }
    }

    pub fn checktime(&mut self) -> Option<f64> {
        let lm = self.lt.since();
        if lm > self.thres {
            self.lt.reset();
            return Some(self.st.since());
        }

        None
    }
}

const TIMEFORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn timestamp_string(ts: i64) -> String {
    match NaiveDateTime::from_timestamp_opt(ts, 0) {
        Some(dt) => dt.format(TIMEFORMAT).to_string(),
        None => String::from("?"),
    }
}

pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::{timestamp_string, Timings};

    #[test]
    fn test_timestamp_string() {
        assert_eq!(timestamp_string(0), "1970-01-01T00:00:00");
        assert_eq!(timestamp_string(1600000000), "2020-09-13T12:26:40");
    }

    #[test]
    fn test_combine_timings() {
        let mut a = Timings::new();
        a.add("scan", 1.0);
        let mut b = Timings::new();
        b.add("scan", 0.5);
        b.add("emit", 2.0);
        a.combine(b);
        assert_eq!(a.timings, vec![(String::from("scan"), 1.5), (String::from("emit"), 2.0)]);
    }
}
