use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FlowStep {
    Element(u32),
    Indirection,
}

impl Ord for FlowStep {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FlowStep::Indirection, FlowStep::Indirection) => Ordering::Equal,
            (FlowStep::Element(a), FlowStep::Element(b)) => a.cmp(b),
            (FlowStep::Indirection, FlowStep::Element(_)) => Ordering::Less,
            (FlowStep::Element(_), FlowStep::Indirection) => Ordering::Greater,
        }
    }
}

impl PartialOrd for FlowStep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// EPUB-CFI style path such as `epubcfi(/6/4!/4/2/1:10)`. Ordered step by
/// step, then by offset; never used arithmetically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct FlowPosition {
    steps: Vec<FlowStep>,
    offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowPositionError {
    #[error("flow position must look like epubcfi(...): {0:?}")]
    MissingWrapper(String),
    #[error("flow position has no steps")]
    Empty,
    #[error("invalid step {0:?}")]
    InvalidStep(String),
    #[error("invalid character offset {0:?}")]
    InvalidOffset(String),
}

impl FlowPosition {
    /// Position of the first character of the `spine_index`-th content
    /// document (0-based) in the package spine.
    pub fn section_start(spine_index: usize) -> Self {
        Self::in_section(spine_index, 0)
    }

    /// Position `char_offset` characters into the body text of a content
    /// document.
    pub fn in_section(spine_index: usize, char_offset: u32) -> Self {
        let spine_step = u32::try_from(spine_index)
            .unwrap_or(u32::MAX / 2 - 1)
            .saturating_add(1)
            .saturating_mul(2);
        Self {
            steps: vec![
                FlowStep::Element(6),
                FlowStep::Element(spine_step),
                FlowStep::Indirection,
                FlowStep::Element(4),
            ],
            offset: Some(char_offset),
        }
    }

    /// Spine index and character offset for positions built by
    /// [`FlowPosition::in_section`]. Other shapes yield `None`.
    pub fn section_offset(&self) -> Option<(usize, u32)> {
        match self.steps.as_slice() {
            [FlowStep::Element(6), FlowStep::Element(spine), FlowStep::Indirection, FlowStep::Element(4), ..]
                if *spine >= 2 && spine % 2 == 0 =>
            {
                Some(((*spine / 2 - 1) as usize, self.offset.unwrap_or(0)))
            }
            _ => None,
        }
    }
}

impl Ord for FlowPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.steps.iter().zip(other.steps.iter()) {
            let step = a.cmp(b);
            if step != Ordering::Equal {
                return step;
            }
        }
        self.steps
            .len()
            .cmp(&other.steps.len())
            .then_with(|| match (self.offset, other.offset) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            })
    }
}

impl PartialOrd for FlowPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FlowPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("epubcfi(")?;
        for step in &self.steps {
            match step {
                FlowStep::Element(index) => write!(f, "/{index}")?,
                FlowStep::Indirection => f.write_str("!")?,
            }
        }
        if let Some(offset) = self.offset {
            write!(f, ":{offset}")?;
        }
        f.write_str(")")
    }
}

impl FromStr for FlowPosition {
    type Err = FlowPositionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix("epubcfi(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| FlowPositionError::MissingWrapper(trimmed.to_string()))?;

        let (path, offset) = match body.rsplit_once(':') {
            Some((path, offset)) => {
                let parsed = offset
                    .parse::<u32>()
                    .map_err(|_| FlowPositionError::InvalidOffset(offset.to_string()))?;
                (path, Some(parsed))
            }
            None => (body, None),
        };

        let mut steps = Vec::new();
        for segment in path.split('/').skip(1) {
            let (segment, indirections) = split_indirections(segment);
            // id assertions such as /4[chap01ref] carry no ordering information
            let index = segment.split('[').next().unwrap_or_default();
            let index = index
                .parse::<u32>()
                .map_err(|_| FlowPositionError::InvalidStep(segment.to_string()))?;
            steps.push(FlowStep::Element(index));
            steps.extend(std::iter::repeat(FlowStep::Indirection).take(indirections));
        }

        if steps.is_empty() {
            return Err(FlowPositionError::Empty);
        }
        Ok(Self { steps, offset })
    }
}

fn split_indirections(segment: &str) -> (&str, usize) {
    let stripped = segment.trim_end_matches('!');
    (stripped, segment.len() - stripped.len())
}

/// Ordered pair of flow positions, `start <= end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRange {
    pub start: FlowPosition,
    pub end: FlowPosition,
}

impl FlowRange {
    /// Builds a range from two selection endpoints in either order.
    pub fn new(anchor: FlowPosition, focus: FlowPosition) -> Self {
        if anchor <= focus {
            Self {
                start: anchor,
                end: focus,
            }
        } else {
            Self {
                start: focus,
                end: anchor,
            }
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, position: &FlowPosition) -> bool {
        &self.start <= position && position <= &self.end
    }
}

impl fmt::Display for FlowRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(input: &str) -> FlowPosition {
        input.parse().unwrap()
    }

    #[test]
    fn parses_and_prints_round_trip() {
        let input = "epubcfi(/6/4!/4/2/1:10)";
        assert_eq!(pos(input).to_string(), input);
    }

    #[test]
    fn id_assertions_are_ignored() {
        assert_eq!(pos("epubcfi(/6/4[chap01ref]!/4/2)"), pos("epubcfi(/6/4!/4/2)"));
    }

    #[test]
    fn orders_by_steps_then_offset() {
        let mut positions = vec![
            pos("epubcfi(/6/8!/4/2/1:50)"),
            pos("epubcfi(/6/4!/4/2/1:10)"),
            pos("epubcfi(/6/6!/4/2/1:30)"),
            pos("epubcfi(/6/4!/4/2/1:5)"),
            pos("epubcfi(/6/4!/4/2)"),
        ];
        positions.sort();
        let printed: Vec<String> = positions.iter().map(ToString::to_string).collect();
        assert_eq!(
            printed,
            vec![
                "epubcfi(/6/4!/4/2)",
                "epubcfi(/6/4!/4/2/1:5)",
                "epubcfi(/6/4!/4/2/1:10)",
                "epubcfi(/6/6!/4/2/1:30)",
                "epubcfi(/6/8!/4/2/1:50)",
            ]
        );
    }

    #[test]
    fn rejects_malformed_positions() {
        assert!(matches!(
            "/6/4".parse::<FlowPosition>(),
            Err(FlowPositionError::MissingWrapper(_))
        ));
        assert!(matches!(
            "epubcfi(/6/x)".parse::<FlowPosition>(),
            Err(FlowPositionError::InvalidStep(_))
        ));
        assert!(matches!(
            "epubcfi(/6/4:abc)".parse::<FlowPosition>(),
            Err(FlowPositionError::InvalidOffset(_))
        ));
        assert!(matches!(
            "epubcfi()".parse::<FlowPosition>(),
            Err(FlowPositionError::Empty)
        ));
    }

    #[test]
    fn section_positions_round_trip_their_coordinates() {
        let position = FlowPosition::in_section(3, 42);
        assert_eq!(position.to_string(), "epubcfi(/6/8!/4:42)");
        assert_eq!(position.section_offset(), Some((3, 42)));
        assert!(FlowPosition::section_start(0) < FlowPosition::in_section(0, 1));
        assert!(FlowPosition::in_section(0, 999) < FlowPosition::section_start(1));
    }

    #[test]
    fn range_normalizes_endpoint_order() {
        let early = FlowPosition::in_section(1, 5);
        let late = FlowPosition::in_section(1, 25);
        let range = FlowRange::new(late.clone(), early.clone());
        assert_eq!(range.start, early);
        assert_eq!(range.end, late);
        assert!(range.contains(&FlowPosition::in_section(1, 10)));
        assert!(!range.is_collapsed());
    }

    #[test]
    fn serializes_as_a_string() {
        let position = FlowPosition::in_section(0, 7);
        let json = serde_json::to_string(&position).unwrap();
        assert_eq!(json, "\"epubcfi(/6/2!/4:7)\"");
        let back: FlowPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, position);
    }
}
