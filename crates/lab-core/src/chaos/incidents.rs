//! Incident bookkeeping

use chrono::{DateTime, Utc};

use crate::models::{Incident, IncidentStatus, IncidentType};
use crate::ring::RingBuffer;

const FIRST_INCIDENT_NUMBER: u64 = 1001;

/// Open incidents plus a bounded history of resolved ones
#[derive(Debug, Clone)]
pub struct IncidentLog {
    active: Vec<Incident>,
    resolved: RingBuffer<Incident>,
    next_number: u64,
}

impl IncidentLog {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            active: Vec::new(),
            resolved: RingBuffer::new(history_capacity),
            next_number: FIRST_INCIDENT_NUMBER,
        }
    }

    pub fn open(&mut self, incident_type: IncidentType, target: Option<String>, at: DateTime<Utc>) -> Incident {
        let incident = Incident {
            id: format!("INC-{}", self.next_number),
            incident_type,
            target,
            started_at: at,
            duration_observed_ms: None,
            status: IncidentStatus::Investigating,
        };
        self.next_number += 1;
        self.active.push(incident.clone());
        incident
    }

    /// Move an open incident to the history. `None` if it is not open.
    pub fn resolve(&mut self, id: &str, duration_ms: u64) -> Option<Incident> {
        let position = self.active.iter().position(|i| i.id == id)?;
        let mut incident = self.active.remove(position);
        incident.status = IncidentStatus::Resolved;
        incident.duration_observed_ms = Some(duration_ms);
        self.resolved.push(incident.clone());
        Some(incident)
    }

    pub fn active(&self) -> &[Incident] {
        &self.active
    }

    /// Resolved incidents, most recent first
    pub fn history(&self) -> Vec<Incident> {
        self.resolved.iter_recent().cloned().collect()
    }

    /// Drop open incidents without resolving them
    pub fn abandon_active(&mut self) -> usize {
        let count = self.active.len();
        self.active.clear();
        count
    }
}

impl Default for IncidentLog {
    fn default() -> Self {
        Self::new(10)
    }
}
