//! Priority tier routing table: an ordered sequence of score ranges loaded
//! from a tabular config with columns `topic root, topic uid, priority id,
//! low score, high score`, read once at construction and scanned linearly
//! by `tier_for`.

use std::path::Path;

use thiserror::Error;

/// One row of the topic table: a contiguous, half-open score range mapped to
/// a topic name.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityTier {
    pub tier_id: u32,
    pub low_score: f64,
    pub high_score: f64,
    /// Optional backend-qualified path prefix (the table's `topic root`
    /// column); empty string if the row didn't specify one.
    pub topic_root: String,
    /// The short topic name used everywhere else in the system (the table's
    /// `topic uid` column).
    pub topic_name: String,
}

#[derive(Debug, Error)]
pub enum TopicTableError {
    #[error("failed to read topic table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("topic table {path} has no header row")]
    MissingHeader { path: String },
    #[error("topic table {path} is missing required column(s): {missing}")]
    MissingColumns { path: String, missing: String },
    #[error("topic table {path} row {row}: invalid numeric score {value:?}")]
    InvalidScore {
        path: String,
        row: usize,
        value: String,
    },
    #[error("topic table {path} has no usable rows")]
    Empty { path: String },
}

/// An ordered sequence of priority tiers, highest priority first.
#[derive(Debug, Clone)]
pub struct TopicTable {
    tiers: Vec<PriorityTier>,
    intake_topic: String,
    dead_letter_topic: String,
}

impl TopicTable {
    pub fn from_tiers(
        tiers: Vec<PriorityTier>,
        intake_topic: impl Into<String>,
        dead_letter_topic: impl Into<String>,
    ) -> Self {
        Self {
            tiers,
            intake_topic: intake_topic.into(),
            dead_letter_topic: dead_letter_topic.into(),
        }
    }

    /// Load and parse a tabular topic-table file. Reload requires a restart
    /// — the table is immutable once constructed.
    pub fn load(
        path: &Path,
        intake_topic: impl Into<String>,
        dead_letter_topic: impl Into<String>,
    ) -> Result<Self, TopicTableError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| TopicTableError::Io {
            path: display.clone(),
            source,
        })?;
        let tiers = parse_rows(&raw, &display)?;
        Ok(Self::from_tiers(tiers, intake_topic, dead_letter_topic))
    }

    /// Highest-priority-first topic names.
    pub fn tiers(&self) -> &[PriorityTier] {
        &self.tiers
    }

    pub fn tier_topics(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.topic_name.as_str()).collect()
    }

    /// First row whose `[low, high)` contains `score`; falls back to the
    /// last (lowest-priority) row as the catch-all tier. `None` only when
    /// the table has zero rows, which `load` already rejects.
    pub fn tier_for(&self, score: f64) -> Option<&str> {
        for tier in &self.tiers {
            if score >= tier.low_score && score < tier.high_score {
                return Some(tier.topic_name.as_str());
            }
        }
        self.tiers.last().map(|t| t.topic_name.as_str())
    }

    pub fn intake_topic(&self) -> &str {
        &self.intake_topic
    }

    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }
}

fn parse_rows(raw: &str, path: &str) -> Result<Vec<PriorityTier>, TopicTableError> {
    let mut lines = raw.lines();
    let header = lines.next().ok_or_else(|| TopicTableError::MissingHeader {
        path: path.to_string(),
    })?;
    let headers: Vec<String> = header
        .split(',')
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    let find = |name: &str| headers.iter().position(|h| h == name);

    let col_root = find("topic root");
    let col_uid = find("topic uid");
    let col_priority = find("priority id");
    let col_low = find("low score");
    let col_high = find("high score");

    let missing: Vec<&str> = [
        ("topic uid", col_uid),
        ("priority id", col_priority),
        ("low score", col_low),
        ("high score", col_high),
    ]
    .into_iter()
    .filter(|(_, c)| c.is_none())
    .map(|(name, _)| name)
    .collect();
    if !missing.is_empty() {
        return Err(TopicTableError::MissingColumns {
            path: path.to_string(),
            missing: missing.join(", "),
        });
    }
    let col_uid = col_uid.unwrap();
    let col_priority = col_priority.unwrap();
    let col_low = col_low.unwrap();
    let col_high = col_high.unwrap();

    let mut tiers = Vec::new();
    for (offset, line) in lines.enumerate() {
        let cols: Vec<&str> = line.split(',').map(str::trim).collect();
        if cols.iter().all(|c| c.is_empty()) {
            continue; // blank row
        }
        let get = |idx: usize| cols.get(idx).copied().unwrap_or("");
        let topic_uid = get(col_uid);
        if topic_uid.is_empty() {
            continue;
        }
        let row_number = offset + 2; // +1 for the header, +1 for 1-indexing
        let low: f64 = get(col_low)
            .parse()
            .map_err(|_| TopicTableError::InvalidScore {
                path: path.to_string(),
                row: row_number,
                value: get(col_low).to_string(),
            })?;
        let high: f64 = get(col_high)
            .parse()
            .map_err(|_| TopicTableError::InvalidScore {
                path: path.to_string(),
                row: row_number,
                value: get(col_high).to_string(),
            })?;
        let tier_id: u32 = get(col_priority).parse().unwrap_or(tiers.len() as u32 + 1);

        tiers.push(PriorityTier {
            tier_id,
            low_score: low,
            high_score: high,
            topic_root: col_root.map(|i| get(i)).unwrap_or("").to_string(),
            topic_name: topic_uid.to_string(),
        });
    }

    if tiers.is_empty() {
        return Err(TopicTableError::Empty {
            path: path.to_string(),
        });
    }
    Ok(tiers)
}
