//! Classification scales
//!
//! A scale maps a raw value to a scoring level. Scales back the
//! scale-calculated field kind and the level buckets used by result-set
//! summaries.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// One level of a scale: a numeric score, a display label, and a sortable
/// weight used to group scores by the scale that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub score: f64,
    pub label: String,
    pub weight: i32,
}

impl Level {
    pub fn new(score: f64, label: impl Into<String>) -> Self {
        Self {
            score,
            label: label.into(),
            weight: 0,
        }
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }
}

/// A mapping from raw values to scoring levels
#[derive(Debug, Clone)]
pub enum Scale {
    /// Always the same level
    Static(Level),
    /// Ordered numeric thresholds, each break bounding one level
    Breaks {
        breaks: Vec<f64>,
        levels: Vec<Level>,
        right: bool,
    },
    /// Exact value lookup with a fallback level
    Dict {
        entries: Vec<(Value, Level)>,
        default: Level,
    },
}

impl Scale {
    /// A scale that always yields the same level
    pub fn fixed(level: Level) -> Self {
        Scale::Static(level)
    }

    /// A breaks scale from plain scores; levels are labeled by score.
    /// Right-inclusive: a value equal to a break falls in the level below it.
    pub fn breaks(breaks: Vec<f64>, scores: Vec<f64>, right: bool) -> OrmResult<Self> {
        let levels = scores
            .iter()
            .map(|&score| Level::new(score, format_score(score)))
            .collect();
        Self::breaks_with_levels(breaks, levels, right)
    }

    /// A breaks scale with explicit levels
    pub fn breaks_with_levels(breaks: Vec<f64>, levels: Vec<Level>, right: bool) -> OrmResult<Self> {
        if breaks.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(OrmError::Configuration(
                "Breaks must be provided in increasing order".to_string(),
            ));
        }
        if breaks.len() + 1 != levels.len() {
            return Err(OrmError::Configuration(
                "The number of levels must be one greater than the number of breaks".to_string(),
            ));
        }
        Ok(Scale::Breaks {
            breaks,
            levels,
            right,
        })
    }

    /// A dictionary scale from plain value/score pairs
    pub fn dict(pairs: Vec<(Value, f64)>, default: f64) -> Self {
        Scale::Dict {
            entries: pairs
                .into_iter()
                .map(|(value, score)| {
                    let level = Level::new(score, format_score(score));
                    (value, level)
                })
                .collect(),
            default: Level::new(default, format_score(default)),
        }
    }

    /// A dictionary scale with explicit levels
    pub fn dict_with_levels(entries: Vec<(Value, Level)>, default: Level) -> Self {
        Scale::Dict { entries, default }
    }

    /// Score the given value
    pub fn score(&self, value: &Value) -> OrmResult<f64> {
        self.level_for(value).map(|level| level.score)
    }

    /// The level the given value falls in
    pub fn level_for(&self, value: &Value) -> OrmResult<Level> {
        match self {
            Scale::Static(level) => Ok(level.clone()),
            Scale::Breaks {
                breaks,
                levels,
                right,
            } => {
                let v = value.as_f64().ok_or_else(|| {
                    OrmError::Configuration(format!(
                        "Breaks scale cannot score non-numeric value {:?}",
                        value
                    ))
                })?;
                for (break_value, level) in breaks.iter().zip(levels.iter()) {
                    if v < *break_value || (*right && v == *break_value) {
                        return Ok(level.clone());
                    }
                }
                Ok(levels[levels.len() - 1].clone())
            }
            Scale::Dict { entries, default } => Ok(entries
                .iter()
                .find(|(key, _)| key == value.raw())
                .map(|(_, level)| level.clone())
                .unwrap_or_else(|| default.clone())),
        }
    }

    /// All levels this scale can yield
    pub fn levels(&self) -> Vec<Level> {
        match self {
            Scale::Static(level) => vec![level.clone()],
            Scale::Breaks { levels, .. } => levels.clone(),
            Scale::Dict { entries, default } => {
                let mut levels: Vec<Level> =
                    entries.iter().map(|(_, level)| level.clone()).collect();
                levels.push(default.clone());
                levels
            }
        }
    }
}

fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

/// Sort levels by (weight, score, label) and drop duplicates
pub fn sort_levels(mut levels: Vec<Level>) -> Vec<Level> {
    levels.sort_by(|a, b| {
        a.weight
            .cmp(&b.weight)
            .then(a.score.total_cmp(&b.score))
            .then(a.label.cmp(&b.label))
    });
    levels.dedup();
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaks_must_increase() {
        let result = Scale::breaks(vec![5.0, 20.0, 15.0], vec![4.0, 3.0, 2.0, 1.0], true);
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn breaks_require_one_extra_level() {
        let result = Scale::breaks(vec![5.0, 10.0, 15.0], vec![3.0, 2.0, 1.0], true);
        assert!(matches!(result, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn breaks_score_right_inclusive() {
        let scale = Scale::breaks(
            vec![5.0, 10.0, 15.0, 20.0],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            true,
        )
        .unwrap();
        assert_eq!(scale.score(&Value::Int(-10)).unwrap(), 1.0);
        assert_eq!(scale.score(&Value::Int(5)).unwrap(), 1.0);
        assert_eq!(scale.score(&Value::Int(6)).unwrap(), 2.0);
        assert_eq!(scale.score(&Value::Int(20)).unwrap(), 4.0);
        assert_eq!(scale.score(&Value::Int(100)).unwrap(), 5.0);
    }

    #[test]
    fn breaks_score_left_inclusive() {
        let scale = Scale::breaks(
            vec![5.0, 10.0, 15.0, 20.0],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            false,
        )
        .unwrap();
        assert_eq!(scale.score(&Value::Int(-10)).unwrap(), 1.0);
        assert_eq!(scale.score(&Value::Int(5)).unwrap(), 2.0);
        assert_eq!(scale.score(&Value::Int(6)).unwrap(), 2.0);
        assert_eq!(scale.score(&Value::Int(19)).unwrap(), 4.0);
        assert_eq!(scale.score(&Value::Int(20)).unwrap(), 5.0);
        assert_eq!(scale.score(&Value::Int(100)).unwrap(), 5.0);
    }

    #[test]
    fn breaks_top_level_is_open_ended() {
        let scale = Scale::breaks(
            vec![100.0, 500.0, 1000.0],
            vec![1.0, 2.0, 3.0, 4.0],
            true,
        )
        .unwrap();
        assert_eq!(scale.score(&Value::Int(50)).unwrap(), 1.0);
        assert_eq!(scale.score(&Value::Int(100)).unwrap(), 1.0);
        assert_eq!(scale.score(&Value::Int(101)).unwrap(), 2.0);
        assert_eq!(scale.score(&Value::Int(1000)).unwrap(), 3.0);
        assert_eq!(scale.score(&Value::Int(5000)).unwrap(), 4.0);
    }

    #[test]
    fn dict_scores_with_default() {
        let scale = Scale::dict(
            vec![
                (Value::from("one"), 1.0),
                (Value::from("two"), 2.0),
                (Value::from("three"), 3.0),
            ],
            0.0,
        );
        assert_eq!(scale.score(&Value::from("one")).unwrap(), 1.0);
        assert_eq!(scale.score(&Value::from("three")).unwrap(), 3.0);
        assert_eq!(scale.score(&Value::from("notakey")).unwrap(), 0.0);
    }

    #[test]
    fn static_scale_ignores_value() {
        let scale = Scale::fixed(Level::new(7.0, "fixed"));
        assert_eq!(scale.score(&Value::Int(1)).unwrap(), 7.0);
        assert_eq!(scale.score(&Value::from("anything")).unwrap(), 7.0);
    }

    #[test]
    fn sort_levels_orders_and_dedupes() {
        let levels = vec![
            Level::new(2.0, "two"),
            Level::new(1.0, "one").with_weight(1),
            Level::new(1.0, "one"),
            Level::new(1.0, "one"),
        ];
        let sorted = sort_levels(levels);
        assert_eq!(sorted.len(), 3);
        assert_eq!(sorted[0].label, "one");
        assert_eq!(sorted[0].weight, 0);
        assert_eq!(sorted[1].label, "two");
        assert_eq!(sorted[2].weight, 1);
    }
}
