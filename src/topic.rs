//! Topic naming and pattern matching.
//!
//! Topics are `/`-separated paths. Subscription patterns may end in the
//! multi-level wildcard `#`, which matches every remaining segment
//! (including none, so `sensor/#` also matches `sensor`). There is no
//! single-level wildcard.

use crate::reading::{Scenario, SensorType};
use thiserror::Error;

pub const SEPARATOR: char = '/';
pub const MULTI_LEVEL_WILDCARD: &str = "#";
pub const SENSOR_ROOT: &str = "sensor";
pub const ALERT_ROOT: &str = "alerts";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,
    #[error("topic `{0}` has an empty segment")]
    EmptySegment(String),
    #[error("wildcard is only allowed as the last segment of a pattern: `{0}`")]
    MisplacedWildcard(String),
    #[error("wildcards are not allowed in published topics: `{0}`")]
    WildcardInTopic(String),
}

/// `sensor/<scenario>/<type>`, or `sensor/<type>` for single-scenario deployments.
pub fn reading_topic(scenario: Scenario, sensor_type: SensorType) -> String {
    compose(SENSOR_ROOT, scenario, sensor_type)
}

/// `alerts/<scenario>/<type>`, or `alerts/<type>` for single-scenario deployments.
pub fn alert_topic(scenario: Scenario, sensor_type: SensorType) -> String {
    compose(ALERT_ROOT, scenario, sensor_type)
}

fn compose(root: &str, scenario: Scenario, sensor_type: SensorType) -> String {
    if scenario.is_single_scenario() {
        format!("{root}/{sensor_type}")
    } else {
        format!("{root}/{scenario}/{sensor_type}")
    }
}

/// Pattern matching every sensor topic of one scenario.
pub fn scenario_pattern(root: &str, scenario: Scenario) -> String {
    if scenario.is_single_scenario() {
        format!("{root}/{MULTI_LEVEL_WILDCARD}")
    } else {
        format!("{root}/{scenario}/{MULTI_LEVEL_WILDCARD}")
    }
}

/// Check that `topic` is publishable.
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    for segment in topic.split(SEPARATOR) {
        if segment.is_empty() {
            return Err(TopicError::EmptySegment(topic.to_string()));
        }
        if segment.contains('#') {
            return Err(TopicError::WildcardInTopic(topic.to_string()));
        }
    }
    Ok(())
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<String>,
    tail_wildcard: bool,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, TopicError> {
        if pattern.is_empty() {
            return Err(TopicError::Empty);
        }

        let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());
        let mut tail_wildcard = false;

        for (index, part) in parts.into_iter().enumerate() {
            if part.is_empty() {
                return Err(TopicError::EmptySegment(pattern.to_string()));
            }
            if part == MULTI_LEVEL_WILDCARD {
                if index != last {
                    return Err(TopicError::MisplacedWildcard(pattern.to_string()));
                }
                tail_wildcard = true;
            } else if part.contains('#') {
                return Err(TopicError::MisplacedWildcard(pattern.to_string()));
            } else {
                segments.push(part.to_string());
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            tail_wildcard,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut levels = topic.split(SEPARATOR);
        for expected in &self.segments {
            match levels.next() {
                Some(level) if level == expected => {}
                _ => return false,
            }
        }
        self.tail_wildcard || levels.next().is_none()
    }
}

/// Match a raw pattern against a topic. Invalid patterns match nothing.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    TopicPattern::parse(pattern).is_ok_and(|pattern| pattern.matches(topic))
}

/// Components of a `sensor/...` or `alerts/...` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoute<'a> {
    pub root: &'a str,
    pub scenario: Scenario,
    /// Kept as the raw segment so unrecognised classes still route.
    pub sensor_type: &'a str,
}

/// Split a reading or alert topic into root, scenario and sensor type.
///
/// Two-segment topics belong to the single-scenario deployment.
pub fn parse_route(topic: &str) -> Option<TopicRoute<'_>> {
    let segments: Vec<&str> = topic.split(SEPARATOR).collect();
    match *segments.as_slice() {
        [root, sensor_type] => Some(TopicRoute {
            root,
            scenario: Scenario::Generic,
            sensor_type,
        }),
        [root, scenario, sensor_type] => Some(TopicRoute {
            root,
            scenario: scenario.parse().ok()?,
            sensor_type,
        }),
        _ => None,
    }
}
