//! HELLO payload parsing.
//!
//! The payload is a small indentation-structured text config (the ZPL
//! dialect simulator stacks emit): `name = value` pairs, subtrees indented
//! by four spaces per level, `#` comment lines. The broker cares about two
//! things in it:
//!
//! ```text
//! time_delta = 100ms
//! values
//!     lead_voltage
//!         topic = feeder1/voltage
//!     # short forms are accepted too:
//!     load = feeder1/load
//!     frequency
//! ```
//!
//! Each `values` entry resolves its subscription topic from, in order: a
//! `topic` sub-key, an inline value, or the entry's own key.

use std::collections::BTreeSet;

use lockstep_types::{parse_duration, SimTime, TimeParseError};
use thiserror::Error;
use tracing::trace;

/// Errors from an unparseable HELLO payload.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config payload is not UTF-8")]
    NotUtf8,

    #[error("bad indentation at line {line} (expected multiples of 4 spaces)")]
    BadIndentation { line: usize },

    #[error("invalid time_delta: {0}")]
    TimeDelta(#[from] TimeParseError),

    #[error("time_delta must be nonzero")]
    ZeroTimeDelta,
}

/// Parsed HELLO payload: the simulator's tick and its subscription topics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelloConfig {
    /// `None` when the payload omits `time_delta`; the coordinator applies
    /// the 1 s default (with a warning) in that case.
    pub time_delta: Option<SimTime>,
    pub subscriptions: BTreeSet<String>,
}

impl HelloConfig {
    pub fn parse(payload: &[u8]) -> Result<HelloConfig, ConfigError> {
        let text = std::str::from_utf8(payload).map_err(|_| ConfigError::NotUtf8)?;
        let root = parse_tree(text)?;

        let time_delta = match root.find("time_delta").and_then(|n| n.value.as_deref()) {
            Some(raw) => {
                let delta = parse_duration(raw)?;
                if delta.is_zero() {
                    return Err(ConfigError::ZeroTimeDelta);
                }
                Some(delta)
            }
            None => None,
        };

        let mut subscriptions = BTreeSet::new();
        if let Some(values) = root.find("values") {
            for entry in &values.children {
                let topic = entry
                    .find("topic")
                    .and_then(|n| n.value.clone())
                    .or_else(|| entry.value.clone())
                    .unwrap_or_else(|| entry.name.clone());
                trace!(topic, "subscription value");
                subscriptions.insert(topic);
            }
        }

        Ok(HelloConfig {
            time_delta,
            subscriptions,
        })
    }
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    value: Option<String>,
    children: Vec<Node>,
}

impl Node {
    fn find(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Parse the indentation tree. Returns a nameless root whose children are
/// the top-level entries.
fn parse_tree(text: &str) -> Result<Node, ConfigError> {
    let mut root = Node::default();
    // Path of child indices from the root to the most recent node per level.
    let mut path: Vec<usize> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim_end();
        let content = line.trim_start_matches(' ');
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        let indent = line.len() - content.len();
        if content.starts_with(|c: char| c.is_whitespace()) || indent % 4 != 0 {
            // Tabs or a non-multiple-of-4 indent.
            return Err(ConfigError::BadIndentation { line: line_no });
        }
        let level = indent / 4;
        if level > path.len() {
            return Err(ConfigError::BadIndentation { line: line_no });
        }
        path.truncate(level);

        let (name, value) = match content.split_once('=') {
            Some((name, value)) => (name.trim(), Some(unquote(value.trim()).to_string())),
            None => (content, None),
        };

        let parent = node_at(&mut root, &path);
        parent.children.push(Node {
            name: name.to_string(),
            value,
            children: Vec::new(),
        });
        path.push(parent.children.len() - 1);
    }

    Ok(root)
}

fn node_at<'a>(root: &'a mut Node, path: &[usize]) -> &'a mut Node {
    let mut node = root;
    for &i in path {
        node = &mut node.children[i];
    }
    node
}

fn unquote(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_payload() {
        let cfg = HelloConfig::parse(b"time_delta = 1s\n").unwrap();
        assert_eq!(cfg.time_delta, Some(SimTime::ONE_SECOND));
        assert!(cfg.subscriptions.is_empty());
    }

    #[test]
    fn missing_time_delta_is_none() {
        let cfg = HelloConfig::parse(b"name = thing\n").unwrap();
        assert_eq!(cfg.time_delta, None);
    }

    #[test]
    fn empty_payload() {
        let cfg = HelloConfig::parse(b"").unwrap();
        assert_eq!(cfg, HelloConfig::default());
    }

    #[test]
    fn values_all_three_topic_forms() {
        let payload = b"\
time_delta = 100ms
values
    lead_voltage
        topic = feeder1/voltage
    load = feeder1/load
    frequency
";
        let cfg = HelloConfig::parse(payload).unwrap();
        assert_eq!(cfg.time_delta, Some(SimTime::from_nanos(100_000_000)));
        let topics: Vec<&str> = cfg.subscriptions.iter().map(|s| s.as_str()).collect();
        assert_eq!(topics, vec!["feeder1/load", "feeder1/voltage", "frequency"]);
    }

    #[test]
    fn comments_and_blank_lines() {
        let payload = b"\
# broker config
time_delta = 2s

values
    # only one real entry
    x = topic_x
";
        let cfg = HelloConfig::parse(payload).unwrap();
        assert_eq!(cfg.time_delta, Some(SimTime::from_nanos(2_000_000_000)));
        assert_eq!(cfg.subscriptions.len(), 1);
        assert!(cfg.subscriptions.contains("topic_x"));
    }

    #[test]
    fn quoted_values() {
        let cfg = HelloConfig::parse(b"values\n    x = \"a topic\"\n").unwrap();
        assert!(cfg.subscriptions.contains("a topic"));
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(matches!(
            HelloConfig::parse(&[0xff, 0xfe, 0x00]),
            Err(ConfigError::NotUtf8)
        ));
    }

    #[test]
    fn rejects_bad_indentation() {
        assert!(matches!(
            HelloConfig::parse(b"values\n   x = y\n"),
            Err(ConfigError::BadIndentation { line: 2 })
        ));
        assert!(matches!(
            HelloConfig::parse(b"values\n\tx = y\n"),
            Err(ConfigError::BadIndentation { line: 2 })
        ));
        // Jumping two levels deep with no intermediate parent.
        assert!(matches!(
            HelloConfig::parse(b"values\n        x = y\n"),
            Err(ConfigError::BadIndentation { line: 2 })
        ));
    }

    #[test]
    fn rejects_bad_time_delta() {
        assert!(matches!(
            HelloConfig::parse(b"time_delta = fast\n"),
            Err(ConfigError::TimeDelta(_))
        ));
        assert!(matches!(
            HelloConfig::parse(b"time_delta = 0s\n"),
            Err(ConfigError::ZeroTimeDelta)
        ));
    }

    #[test]
    fn duplicate_topics_collapse() {
        let payload = b"values\n    a = x\n    b = x\n";
        let cfg = HelloConfig::parse(payload).unwrap();
        assert_eq!(cfg.subscriptions.len(), 1);
    }
}
