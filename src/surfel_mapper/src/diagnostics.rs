//! Diagnostics for the surfel mapper.
//!
//! Three categories are refreshed every tick: `mapper_status` (map
//! initialization and the last fusion), `queue_status` (backlog and pose
//! availability) and `map_status` (occupancy and capacity).

use std::fmt;

use tracing::{debug, error, warn};

/// Diagnostic severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DiagnosticLevel {
    Ok = 0,
    Warn = 1,
    Error = 2,
    Stale = 3,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Stale => "STALE",
        };
        f.write_str(name)
    }
}

/// Snapshot of one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticStatus {
    pub name: String,
    pub hardware_id: String,
    pub level: DiagnosticLevel,
    pub message: String,
    pub values: Vec<(String, String)>,
}

/// A single diagnostic category (e.g., "queue_status").
#[derive(Debug, Clone)]
pub struct DiagnosticCategory {
    name: String,
    hardware_id: String,
    level: DiagnosticLevel,
    message: String,
    key_values: Vec<(String, String)>,
}

impl DiagnosticCategory {
    pub fn new(name: &str, hardware_id: &str) -> Self {
        Self {
            name: name.to_string(),
            hardware_id: hardware_id.to_string(),
            level: DiagnosticLevel::Ok,
            message: String::new(),
            key_values: Vec::new(),
        }
    }

    /// Clear all key-value pairs and reset level.
    pub fn clear(&mut self) {
        self.key_values.clear();
        self.level = DiagnosticLevel::Ok;
        self.message.clear();
    }

    pub fn add_key_value(&mut self, key: &str, value: impl ToString) {
        self.key_values.push((key.to_string(), value.to_string()));
    }

    /// Update the diagnostic level and message.
    /// Only updates if the new level is more severe than current.
    pub fn update_level_and_message(&mut self, level: DiagnosticLevel, message: &str) {
        if level > self.level {
            self.level = level;
            self.message = message.to_string();
        }
    }

    fn to_status(&self) -> DiagnosticStatus {
        DiagnosticStatus {
            name: self.name.clone(),
            hardware_id: self.hardware_id.clone(),
            level: self.level,
            message: self.message.clone(),
            values: self.key_values.clone(),
        }
    }
}

/// Diagnostics interface for the surfel mapper.
#[derive(Debug, Clone)]
pub struct DiagnosticsInterface {
    mapper: DiagnosticCategory,
    queue: DiagnosticCategory,
    map: DiagnosticCategory,
}

impl Default for DiagnosticsInterface {
    fn default() -> Self {
        let hardware_id = "surfel_mapper";
        Self {
            mapper: DiagnosticCategory::new("mapper_status", hardware_id),
            queue: DiagnosticCategory::new("queue_status", hardware_id),
            map: DiagnosticCategory::new("map_status", hardware_id),
        }
    }
}

impl DiagnosticsInterface {
    pub fn mapper_mut(&mut self) -> &mut DiagnosticCategory {
        &mut self.mapper
    }

    pub fn queue_mut(&mut self) -> &mut DiagnosticCategory {
        &mut self.queue
    }

    pub fn map_mut(&mut self) -> &mut DiagnosticCategory {
        &mut self.map
    }

    /// Collect every category and log the ones that are not OK.
    pub fn publish(&self) -> Vec<DiagnosticStatus> {
        let statuses = vec![
            self.mapper.to_status(),
            self.queue.to_status(),
            self.map.to_status(),
        ];

        for status in &statuses {
            match status.level {
                DiagnosticLevel::Ok => debug!(
                    hardware_id = %status.hardware_id,
                    name = %status.name,
                    values = ?status.values,
                    "Diagnostics OK"
                ),
                DiagnosticLevel::Warn | DiagnosticLevel::Stale => warn!(
                    hardware_id = %status.hardware_id,
                    name = %status.name,
                    level = %status.level,
                    message = %status.message,
                    "Diagnostics"
                ),
                DiagnosticLevel::Error => error!(
                    hardware_id = %status.hardware_id,
                    name = %status.name,
                    message = %status.message,
                    "Diagnostics"
                ),
            }
        }

        statuses
    }
}
