//! Subscription predicates

use std::collections::HashSet;

use seneca_protocol::Event;

/// Conjunctive event filter; an empty filter matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    event_types: Option<HashSet<String>>,
    sources: Option<HashSet<String>>,
}

impl EventFilter {
    /// Filter that accepts every event
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept events of this type (repeatable)
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types
            .get_or_insert_with(HashSet::new)
            .insert(event_type.into());
        self
    }

    /// Accept events from this source instance (repeatable)
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.sources
            .get_or_insert_with(HashSet::new)
            .insert(source.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        let type_ok = self
            .event_types
            .as_ref()
            .map_or(true, |types| types.contains(event.event_type()));
        let source_ok = self
            .sources
            .as_ref()
            .map_or(true, |sources| sources.contains(event.source_instance_id()));
        type_ok && source_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_matches_all() {
        let ev = Event::new("a", "task_assigned", json!({}));
        assert!(EventFilter::all().matches(&ev));
    }

    #[test]
    fn test_conjunctive() {
        let filter = EventFilter::all().source("a").event_type("task_assigned");
        assert!(filter.matches(&Event::new("a", "task_assigned", json!({}))));
        assert!(!filter.matches(&Event::new("b", "task_assigned", json!({}))));
        assert!(!filter.matches(&Event::new("a", "blocker", json!({}))));
    }

    #[test]
    fn test_repeated_values_are_alternatives() {
        let filter = EventFilter::all().event_type("x").event_type("y");
        assert!(filter.matches(&Event::new("a", "x", json!({}))));
        assert!(filter.matches(&Event::new("a", "y", json!({}))));
        assert!(!filter.matches(&Event::new("a", "z", json!({}))));
    }
}
