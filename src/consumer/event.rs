//! Discrete events emitted by consumers

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    #[default]
    Completed,
    /// More events for the same occurrence follow
    Continued,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventData {
    #[default]
    Empty,
    Label(String),
    Classification {
        class: String,
        probability: f64,
    },
    /// Every class with its probability, in class order
    Probabilities(Vec<(String, f64)>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub sender: String,
    /// Start of the covered interval in milliseconds
    pub time_ms: u64,
    pub duration_ms: u64,
    pub state: EventState,
    pub data: EventData,
}

impl Event {
    pub fn new(name: &str, sender: &str, time_ms: u64, duration_ms: u64, data: EventData) -> Self {
        Self {
            name: name.to_string(),
            sender: sender.to_string(),
            time_ms,
            duration_ms,
            state: EventState::Completed,
            data,
        }
    }

    /// Label event as sent to a trainer
    pub fn label(label: &str, time_ms: u64, duration_ms: u64) -> Self {
        Self::new(label, "annotation", time_ms, duration_ms, EventData::Label(label.to_string()))
    }

    /// Best class and probability, if the event carries a classification
    pub fn best(&self) -> Option<(&str, f64)> {
        match &self.data {
            EventData::Classification { class, probability } => Some((class.as_str(), *probability)),
            EventData::Probabilities(values) => values
                .iter()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(c, p)| (c.as_str(), *p)),
            _ => None,
        }
    }
}

/// Seconds to whole milliseconds
pub(crate) fn to_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_of_probabilities() {
        let event = Event::new(
            "class",
            "classifier",
            0,
            100,
            EventData::Probabilities(vec![("a".into(), 0.2), ("b".into(), 0.8)]),
        );
        assert_eq!(event.best(), Some(("b", 0.8)));
        assert_eq!(Event::label("walk", 0, 0).best(), None);
    }

    #[test]
    fn test_json_shape() {
        let event = Event::new(
            "class",
            "classifier",
            1500,
            500,
            EventData::Classification {
                class: "walk".into(),
                probability: 0.9,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["classification"]["class"], "walk");
        assert_eq!(json["state"], "completed");
        assert_eq!(to_ms(1.2345), 1235);
    }
}
