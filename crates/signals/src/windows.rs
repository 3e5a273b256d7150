//! Per-category delivery windows and wait-time diagnostics.

use std::collections::BTreeMap;

use nudge_core::config::WindowsConfig;
use nudge_core::Category;
use serde::Serialize;

/// Where the current hour stands relative to a category's window.
/// `next_hour` is the next allowed hour strictly after now, present
/// whenever any hour is configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowCheck {
    pub in_window: bool,
    pub next_hour: Option<u32>,
    pub wait_s: Option<u64>,
    pub allowed_hours: Vec<u32>,
}

/// Provider of allowed local send hours. An empty list means the
/// category is unconstrained.
pub trait DeliveryWindowSource: Send + Sync {
    fn allowed_hours(&self, category: Category) -> Vec<u32>;
}

/// Config-backed window source.
pub struct StaticWindows {
    hours_by_category: BTreeMap<Category, Vec<u32>>,
}

impl StaticWindows {
    pub fn new(cfg: &WindowsConfig) -> Self {
        Self {
            hours_by_category: cfg.hours_by_category.clone(),
        }
    }
}

impl DeliveryWindowSource for StaticWindows {
    fn allowed_hours(&self, category: Category) -> Vec<u32> {
        self.hours_by_category
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }
}

/// Evaluate an hour against a window. With no configured hours the
/// check reports out-of-window with nothing to wait for; enforcement
/// policy for that case belongs to the caller.
pub fn check_window(hours: &[u32], hour: u32) -> WindowCheck {
    let in_window = hours.contains(&hour);
    let mut next_hour = None;
    if !hours.is_empty() {
        for i in 1..=24 {
            let candidate = (hour + i) % 24;
            if hours.contains(&candidate) {
                next_hour = Some(candidate);
                break;
            }
        }
    }
    let wait_s = next_hour.map(|next| (((next + 24 - hour) % 24) as u64) * 3600);
    WindowCheck {
        in_window,
        next_hour,
        wait_s,
        allowed_hours: hours.to_vec(),
    }
}
