use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

/// Host services reachable from `extern fn` declarations and timers. Swapping
/// the implementation keeps evaluator call sites unchanged.
pub trait Platform {
    fn now_monotonic_ms(&self) -> i128;
    fn sleep_ms(&self, millis: i128);
    fn read_text(&self, path: &str) -> Result<String, String>;
}

pub struct StdPlatform {
    started: Instant,
}

impl Default for StdPlatform {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Platform for StdPlatform {
    fn now_monotonic_ms(&self) -> i128 {
        self.started.elapsed().as_millis() as i128
    }

    fn sleep_ms(&self, millis: i128) {
        if millis > 0 {
            let millis = u64::try_from(millis).unwrap_or(u64::MAX);
            std::thread::sleep(std::time::Duration::from_millis(millis));
        }
    }

    fn read_text(&self, path: &str) -> Result<String, String> {
        std::fs::read_to_string(path).map_err(|err| err.to_string())
    }
}

/// Deterministic host: the clock only moves when something sleeps.
#[derive(Default)]
pub struct ManualPlatform {
    now: Cell<i128>,
}

impl ManualPlatform {
    pub fn advance(&self, millis: i128) {
        self.now.set(self.now.get().saturating_add(millis.max(0)));
    }
}

impl Platform for ManualPlatform {
    fn now_monotonic_ms(&self) -> i128 {
        self.now.get()
    }

    fn sleep_ms(&self, millis: i128) {
        self.advance(millis);
    }

    fn read_text(&self, path: &str) -> Result<String, String> {
        Err(format!("`read_text({path})` unavailable on the manual host"))
    }
}

/// Destination of `print`.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Captured(Rc<RefCell<Vec<String>>>),
}

impl OutputSink {
    pub fn captured() -> Self {
        OutputSink::Captured(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn write_line(&self, line: String) {
        match self {
            OutputSink::Stdout => println!("{line}"),
            OutputSink::Captured(lines) => lines.borrow_mut().push(line),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        match self {
            OutputSink::Stdout => Vec::new(),
            OutputSink::Captured(lines) => lines.borrow().clone(),
        }
    }
}
