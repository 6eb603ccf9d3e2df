//! Database capacity state machine
//!
//! Tracks where the entry count sits relative to the configured limit and
//! raises an alert on every band transition. The bands are hysteretic:
//! leaving a band downward requires the count to fall below the band's
//! lower bound, so a count oscillating around a threshold raises one alert,
//! not a stream of them.

use serde_json::{json, Value};
use tracing::{info, warn};

/// Capacity band of the entry database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Empty,
    Normal,
    Warn80,
    Warn90,
    Full,
}

/// Hysteretic monitor over entry count vs. capacity
#[derive(Debug)]
pub struct DbStateMonitor {
    state: DbState,
}

impl DbStateMonitor {
    pub fn new() -> Self {
        Self {
            state: DbState::Empty,
        }
    }

    pub fn state(&self) -> DbState {
        self.state
    }

    /// Observe the current count against `limit`; returns the alert payload
    /// when the observation crosses into a different band.
    ///
    /// Draining from Normal to zero parks the machine in Empty silently;
    /// draining to zero from a warning band reports `normal` once.
    pub fn observe(&mut self, count: usize, limit: usize) -> Option<Value> {
        match self.state {
            DbState::Full => {
                if count >= limit {
                    return None;
                }
            }
            DbState::Warn90 => {
                if count < limit && count * 10 >= limit * 9 {
                    return None;
                }
            }
            DbState::Warn80 => {
                if count * 10 < limit * 9 && count * 10 >= limit * 8 {
                    return None;
                }
            }
            DbState::Normal => {
                if count == 0 {
                    self.state = DbState::Empty;
                    return None;
                }
                if count * 10 < limit * 8 {
                    return None;
                }
            }
            DbState::Empty => {
                if count == 0 {
                    return None;
                }
                if count * 10 < limit * 8 {
                    self.state = DbState::Normal;
                    return None;
                }
            }
        }

        let alert_type = if count >= limit {
            self.state = DbState::Full;
            warn!(count, limit, "entry database is full, new entries will be dropped");
            "full"
        } else if count * 10 >= limit * 9 {
            self.state = DbState::Warn90;
            info!(count, limit, "entry database is at 90% of its limit");
            "90_percentage"
        } else if count * 10 >= limit * 8 {
            self.state = DbState::Warn80;
            info!(count, limit, "entry database is at 80% of its limit");
            "80_percentage"
        } else if count > 0 {
            self.state = DbState::Normal;
            info!(count, limit, "entry database is back to a normal level");
            "normal"
        } else {
            self.state = DbState::Empty;
            info!(count, limit, "entry database is back to a normal level");
            "normal"
        };

        Some(json!({
            "file_limit": limit,
            "file_count": count,
            "alert_type": alert_type,
        }))
    }
}

impl Default for DbStateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert_type(value: &Value) -> &str {
        value["alert_type"].as_str().unwrap()
    }

    #[test]
    fn test_rising_ladder() {
        let mut monitor = DbStateMonitor::new();
        let limit = 10;

        // Empty stays silent while empty
        assert!(monitor.observe(0, limit).is_none());
        assert_eq!(monitor.state(), DbState::Empty);

        // Empty -> Normal is silent
        assert!(monitor.observe(3, limit).is_none());
        assert_eq!(monitor.state(), DbState::Normal);

        let alert = monitor.observe(8, limit).unwrap();
        assert_eq!(alert_type(&alert), "80_percentage");
        assert_eq!(alert["file_count"], 8);
        assert_eq!(alert["file_limit"], 10);

        let alert = monitor.observe(9, limit).unwrap();
        assert_eq!(alert_type(&alert), "90_percentage");

        let alert = monitor.observe(10, limit).unwrap();
        assert_eq!(alert_type(&alert), "full");
        assert_eq!(monitor.state(), DbState::Full);

        // Staying full stays silent
        assert!(monitor.observe(12, limit).is_none());
    }

    #[test]
    fn test_falling_ladder_with_hysteresis() {
        let mut monitor = DbStateMonitor::new();
        let limit = 10;
        monitor.observe(10, limit);
        assert_eq!(monitor.state(), DbState::Full);

        // Leaving Full requires dropping below the limit
        let alert = monitor.observe(9, limit).unwrap();
        assert_eq!(alert_type(&alert), "90_percentage");

        // Within the 90 band: silent
        assert!(monitor.observe(9, limit).is_none());

        let alert = monitor.observe(8, limit).unwrap();
        assert_eq!(alert_type(&alert), "80_percentage");
        assert!(monitor.observe(8, limit).is_none());

        let alert = monitor.observe(7, limit).unwrap();
        assert_eq!(alert_type(&alert), "normal");
        assert_eq!(monitor.state(), DbState::Normal);

        // Normal -> Empty is silent
        assert!(monitor.observe(0, limit).is_none());
        assert_eq!(monitor.state(), DbState::Empty);
    }

    #[test]
    fn test_monotone_sequences_emit_each_alert_once() {
        let mut monitor = DbStateMonitor::new();
        let limit = 100;

        let mut alerts = Vec::new();
        for count in 0..=limit {
            if let Some(alert) = monitor.observe(count, limit) {
                alerts.push(alert_type(&alert).to_string());
            }
        }
        assert_eq!(alerts, vec!["80_percentage", "90_percentage", "full"]);

        let mut alerts = Vec::new();
        for count in (0..=limit).rev() {
            if let Some(alert) = monitor.observe(count, limit) {
                alerts.push(alert_type(&alert).to_string());
            }
        }
        assert_eq!(alerts, vec!["90_percentage", "80_percentage", "normal"]);
    }

    #[test]
    fn test_drain_from_warning_band_reports_normal() {
        let mut monitor = DbStateMonitor::new();
        let limit = 10;
        monitor.observe(9, limit);
        assert_eq!(monitor.state(), DbState::Warn90);

        let alert = monitor.observe(0, limit).unwrap();
        assert_eq!(alert_type(&alert), "normal");
        assert_eq!(monitor.state(), DbState::Empty);
    }

    #[test]
    fn test_fractional_limit_boundaries() {
        let mut monitor = DbStateMonitor::new();
        let limit = 7; // 80% = 5.6, 90% = 6.3

        assert!(monitor.observe(5, limit).is_none());
        let alert = monitor.observe(6, limit).unwrap();
        assert_eq!(alert_type(&alert), "80_percentage");
        let alert = monitor.observe(7, limit).unwrap();
        assert_eq!(alert_type(&alert), "full");
    }
}
