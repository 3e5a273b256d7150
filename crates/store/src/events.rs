//! Append-only CSV logs.
//!
//! Three logs, all append-only and never compacted:
//! - event log `ts,arm,reward`: exposures (blank reward) and observed
//!   outcomes; the sole source of truth for offline retraining.
//! - exposure log `ts,arm,category,daypart,tone,channel,treatment,
//!   propensity,reason`: treatment/control rows for the uplift trainer.
//! - passive log `ts,category,event`: passively observed behaviors.
//!
//! Appends write one line with a single `write_all`, so concurrent
//! readers never see a torn row. Malformed lines are skipped on read.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use nudge_core::{ExposureRecord, NudgeEvent, NudgeResult, PassiveActionRecord};

pub trait EventLog: Send + Sync {
    fn append(&self, event: &NudgeEvent) -> NudgeResult<()>;
    fn read_all(&self) -> NudgeResult<Vec<NudgeEvent>>;
}

pub trait ExposureLog: Send + Sync {
    fn append(&self, record: &ExposureRecord) -> NudgeResult<()>;
    fn read_all(&self) -> NudgeResult<Vec<ExposureRecord>>;
}

pub trait PassiveLog: Send + Sync {
    fn read_all(&self) -> NudgeResult<Vec<PassiveActionRecord>>;
}

fn append_line(path: &PathBuf, line: &str) -> NudgeResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

fn read_lines(path: &PathBuf) -> NudgeResult<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text.lines().map(|l| l.to_string()).collect()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

// ─── Event Log ──────────────────────────────────────────────────────────

pub struct FileEventLog {
    path: PathBuf,
}

impl FileEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_line(line: &str) -> Option<NudgeEvent> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 2 {
            return None;
        }
        let ts: i64 = parts[0].trim().parse().ok()?;
        let arm = parts[1].trim();
        if arm.is_empty() {
            return None;
        }
        let reward = match parts.get(2).map(|s| s.trim()) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<f64>().ok()?),
        };
        Some(NudgeEvent {
            ts,
            arm: arm.to_string(),
            reward,
        })
    }
}

impl EventLog for FileEventLog {
    fn append(&self, event: &NudgeEvent) -> NudgeResult<()> {
        let reward = event
            .reward
            .map(|r| format!("{r}"))
            .unwrap_or_default();
        append_line(&self.path, &format!("{},{},{}\n", event.ts, event.arm, reward))
    }

    fn read_all(&self) -> NudgeResult<Vec<NudgeEvent>> {
        let lines = read_lines(&self.path)?;
        let total = lines.len();
        let events: Vec<NudgeEvent> = lines.iter().filter_map(|l| Self::parse_line(l)).collect();
        if events.len() < total {
            debug!(skipped = total - events.len(), "skipped malformed event rows");
        }
        Ok(events)
    }
}

/// In-memory event log for tests.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<NudgeEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<NudgeEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, event: &NudgeEvent) -> NudgeResult<()> {
        self.events
            .lock()
            .expect("event log mutex poisoned")
            .push(event.clone());
        Ok(())
    }

    fn read_all(&self) -> NudgeResult<Vec<NudgeEvent>> {
        Ok(self.events.lock().expect("event log mutex poisoned").clone())
    }
}

// ─── Exposure Log ───────────────────────────────────────────────────────

pub struct FileExposureLog {
    path: PathBuf,
}

impl FileExposureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_line(line: &str) -> Option<ExposureRecord> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 9 {
            return None;
        }
        let treatment = match parts[6].trim() {
            "1" => true,
            "0" => false,
            _ => return None,
        };
        Some(ExposureRecord {
            ts: parts[0].trim().parse().ok()?,
            arm: parts[1].trim().to_string(),
            category: parts[2].trim().parse().ok()?,
            daypart: parts[3].trim().parse().ok()?,
            tone: parts[4].trim().parse().ok()?,
            channel: parts[5].trim().parse().ok()?,
            treatment,
            propensity: parts[7].trim().parse().ok()?,
            reason: parts[8..].join(","),
        })
    }
}

impl ExposureLog for FileExposureLog {
    fn append(&self, record: &ExposureRecord) -> NudgeResult<()> {
        let line = format!(
            "{},{},{},{},{},{},{},{:.4},{}\n",
            record.ts,
            record.arm,
            record.category,
            record.daypart,
            record.tone,
            record.channel,
            u8::from(record.treatment),
            record.propensity,
            record.reason,
        );
        append_line(&self.path, &line)
    }

    fn read_all(&self) -> NudgeResult<Vec<ExposureRecord>> {
        Ok(read_lines(&self.path)?
            .iter()
            .filter_map(|l| Self::parse_line(l))
            .collect())
    }
}

/// In-memory exposure log for tests.
#[derive(Default)]
pub struct MemoryExposureLog {
    records: Mutex<Vec<ExposureRecord>>,
}

impl MemoryExposureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("exposure log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExposureLog for MemoryExposureLog {
    fn append(&self, record: &ExposureRecord) -> NudgeResult<()> {
        self.records
            .lock()
            .expect("exposure log mutex poisoned")
            .push(record.clone());
        Ok(())
    }

    fn read_all(&self) -> NudgeResult<Vec<ExposureRecord>> {
        Ok(self
            .records
            .lock()
            .expect("exposure log mutex poisoned")
            .clone())
    }
}

// ─── Passive Log ────────────────────────────────────────────────────────

/// Passive observations are written by an external tracker; the engine
/// only reads them, so the file impl is read-only.
pub struct FilePassiveLog {
    path: PathBuf,
}

impl FilePassiveLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse_line(line: &str) -> Option<PassiveActionRecord> {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 3 {
            return None;
        }
        Some(PassiveActionRecord {
            ts: parts[0].trim().parse().ok()?,
            category: parts[1].trim().parse().ok()?,
            event: parts[2..].join(","),
        })
    }
}

impl PassiveLog for FilePassiveLog {
    fn read_all(&self) -> NudgeResult<Vec<PassiveActionRecord>> {
        Ok(read_lines(&self.path)?
            .iter()
            .filter_map(|l| Self::parse_line(l))
            .collect())
    }
}

/// In-memory passive log for tests.
#[derive(Default)]
pub struct MemoryPassiveLog {
    records: Mutex<Vec<PassiveActionRecord>>,
}

impl MemoryPassiveLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: PassiveActionRecord) {
        self.records
            .lock()
            .expect("passive log mutex poisoned")
            .push(record);
    }
}

impl PassiveLog for MemoryPassiveLog {
    fn read_all(&self) -> NudgeResult<Vec<PassiveActionRecord>> {
        Ok(self
            .records
            .lock()
            .expect("passive log mutex poisoned")
            .clone())
    }
}
