//! Anchor-based search through a scrollable list.
//!
//! The visible rows are probed at a fixed set of vertical positions (the
//! base area first, then each anchor). When no row satisfies the date
//! condition the list is dragged and the probe repeats, until a row matches,
//! the list stops moving or the pass limit is hit.

use crate::errors::EngineError;
use crate::geometry::{RelativeArea, RelativePosition};
use crate::question::{Question, Scalar, OK};
use crate::verify::compare::{evaluate, parse_date, strip_reference, CompareOp};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Where an additional value is read for every probed row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraRead {
    /// Question list attribute receiving the readings.
    pub attribute: String,
    /// Corner-wise offset from the probed row's area.
    pub offset: RelativeArea,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollSpec {
    /// Question attribute holding the reference date.
    pub target_variable: String,
    /// Drag gesture from `start` to `end` that scrolls the list by one page.
    pub drag: RelativeArea,
    pub base_area: RelativeArea,
    /// Row tops probed after the base area, in order.
    pub anchors: Vec<RelativePosition>,
    pub extra: Option<ExtraRead>,
}

impl ScrollSpec {
    /// Reads the recorded array form
    /// `[target, drag_area, base_area, anchors, extra_attribute, extra_offset]`.
    /// The last two entries are optional and may be null or empty.
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        let invalid = |what: &str| EngineError::InvalidCommand(format!("scroll {what}: {value}"));
        let items = value
            .as_array()
            .filter(|items| items.len() >= 4)
            .ok_or_else(|| invalid("descriptor must have at least 4 entries"))?;

        let target_variable = items[0]
            .as_str()
            .map(|s| strip_reference(s).to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("target must be a question attribute"))?;
        let drag: RelativeArea =
            serde_json::from_value(items[1].clone()).map_err(|_| invalid("drag area is malformed"))?;
        let base_area: RelativeArea =
            serde_json::from_value(items[2].clone()).map_err(|_| invalid("base area is malformed"))?;
        let anchors: Vec<RelativePosition> =
            serde_json::from_value(items[3].clone()).map_err(|_| invalid("anchors are malformed"))?;

        let attribute = items
            .get(4)
            .and_then(Value::as_str)
            .map(|s| strip_reference(s).to_string())
            .filter(|s| !s.is_empty());
        let extra = match (attribute, items.get(5).filter(|v| !v.is_null())) {
            (Some(attribute), Some(offset)) => Some(ExtraRead {
                attribute,
                offset: serde_json::from_value(offset.clone())
                    .map_err(|_| invalid("extra area is malformed"))?,
            }),
            _ => None,
        };

        Ok(Self {
            target_variable,
            drag,
            base_area,
            anchors,
            extra,
        })
    }

    pub fn to_value(&self) -> Value {
        let (attribute, offset) = match &self.extra {
            Some(extra) => (json!(format!(".{}", extra.attribute)), json!(extra.offset)),
            None => (Value::Null, Value::Null),
        };
        json!([
            format!(".{}", self.target_variable),
            self.drag,
            self.base_area,
            self.anchors,
            attribute,
            offset
        ])
    }

    /// Candidate row areas in probe order: the base area, then one per anchor.
    pub fn candidates(&self) -> Vec<RelativeArea> {
        std::iter::once(self.base_area)
            .chain(self.anchors.iter().map(|anchor| self.base_area.with_top(anchor.y())))
            .collect()
    }
}

/// What the search needs from the screen.
#[async_trait::async_trait]
pub trait ScrollSurface: Send {
    async fn read_area(&mut self, area: &RelativeArea) -> Result<String, EngineError>;

    async fn click_at(&mut self, position: RelativePosition) -> Result<(), EngineError>;

    async fn drag(&mut self, from: RelativePosition, to: RelativePosition) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScrollOutcome {
    /// A row matched and was clicked.
    Found { area: RelativeArea, scrolls: u32 },
    /// The list stopped moving or was empty.
    Exhausted { scrolls: u32 },
    /// The pass limit was reached while the list kept changing.
    PassLimit { scrolls: u32 },
}

impl ScrollOutcome {
    pub fn scrolls(&self) -> u32 {
        match self {
            ScrollOutcome::Found { scrolls, .. }
            | ScrollOutcome::Exhausted { scrolls }
            | ScrollOutcome::PassLimit { scrolls } => *scrolls,
        }
    }
}

/// Runs the search, writing each row's outcome to `Ok` and extra readings
/// to their list attribute.
///
/// A reference date that cannot be parsed is fatal; a row that cannot be
/// parsed is simply not a match.
pub async fn scroll_search<S: ScrollSurface + ?Sized>(
    spec: &ScrollSpec,
    question: &mut Question,
    surface: &mut S,
    max_passes: u32,
) -> Result<ScrollOutcome, EngineError> {
    let target = question.get_text(&spec.target_variable).unwrap_or_default();
    parse_date(&target)?;

    let initial = surface.read_area(&spec.base_area).await?;
    if initial.trim().is_empty() {
        info!("Scroll list is empty, nothing to search");
        question.set(OK, false);
        return Ok(ScrollOutcome::Exhausted { scrolls: 0 });
    }

    let candidates = spec.candidates();
    let mut previous: Option<String> = None;
    let mut scrolls = 0;

    for pass in 0..max_passes.max(1) {
        let mut first_reading = String::new();
        for (index, area) in candidates.iter().enumerate() {
            let value = surface.read_area(area).await?;
            if index == 0 {
                first_reading = value.clone();
            }

            let matched = match evaluate(CompareOp::Periodo, &target, &value) {
                Ok(matched) => matched,
                Err(EngineError::InvalidDate(raw)) => {
                    debug!("Row {} is not a date: '{}'", index, raw);
                    false
                }
                Err(e) => return Err(e),
            };
            question.set(OK, matched);

            if let Some(extra) = &spec.extra {
                let reading = surface.read_area(&area.offset_by(&extra.offset)).await?;
                question.push(&extra.attribute, Scalar::text(reading));
            }

            if matched {
                info!("Scroll target matched at row {} after {} scrolls", index, scrolls);
                surface.click_at(area.center()).await?;
                return Ok(ScrollOutcome::Found {
                    area: *area,
                    scrolls,
                });
            }
        }

        if previous.as_deref() == Some(first_reading.as_str()) {
            info!("Scroll list stopped moving after pass {}", pass + 1);
            return Ok(ScrollOutcome::Exhausted { scrolls });
        }
        previous = Some(first_reading);

        if pass + 1 < max_passes {
            surface.drag(spec.drag.start(), spec.drag.end()).await?;
            scrolls += 1;
        }
    }

    info!("Scroll search hit the pass limit ({})", max_passes);
    Ok(ScrollOutcome::PassLimit { scrolls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::AttrValue;

    /// A list of dates where each drag shifts the view by one page.
    struct ListSurface {
        rows: Vec<String>,
        page: usize,
        row_height: f64,
        top: f64,
        drags: u32,
        clicks: Vec<RelativePosition>,
    }

    impl ListSurface {
        fn new(rows: &[&str]) -> Self {
            Self {
                rows: rows.iter().map(|s| s.to_string()).collect(),
                page: 0,
                row_height: 0.1,
                top: 0.2,
                drags: 0,
                clicks: Vec::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ScrollSurface for ListSurface {
        async fn read_area(&mut self, area: &RelativeArea) -> Result<String, EngineError> {
            if area.start().x() > 0.5 {
                return Ok("extra".to_string());
            }
            let row = ((area.start().y() - self.top) / self.row_height).round() as usize;
            Ok(self.rows.get(self.page * 3 + row).cloned().unwrap_or_default())
        }

        async fn click_at(&mut self, position: RelativePosition) -> Result<(), EngineError> {
            self.clicks.push(position);
            Ok(())
        }

        async fn drag(&mut self, _from: RelativePosition, _to: RelativePosition) -> Result<(), EngineError> {
            self.drags += 1;
            if (self.page + 1) * 3 < self.rows.len() {
                self.page += 1;
            }
            Ok(())
        }
    }

    fn spec(extra: bool) -> ScrollSpec {
        ScrollSpec {
            target_variable: "Timenow".to_string(),
            drag: RelativeArea(RelativePosition(0.3, 0.5), RelativePosition(0.3, 0.2)),
            base_area: RelativeArea(RelativePosition(0.1, 0.2), RelativePosition(0.4, 0.25)),
            anchors: vec![RelativePosition(0.1, 0.3), RelativePosition(0.1, 0.4)],
            extra: extra.then(|| ExtraRead {
                attribute: "Listatransacoes".to_string(),
                offset: RelativeArea(RelativePosition(0.5, 0.0), RelativePosition(0.5, 0.0)),
            }),
        }
    }

    fn question(reference: &str) -> Question {
        let mut q = Question::new();
        q.set("Limite", reference);
        q
    }

    fn limited(mut s: ScrollSpec) -> ScrollSpec {
        s.target_variable = "Limite".to_string();
        s
    }

    #[tokio::test]
    async fn match_in_first_anchor_never_scrolls() {
        let mut surface = ListSurface::new(&["01/01/2024", "02/01/2024", "03/01/2024"]);
        let mut q = question("15/01/2024");
        let outcome = scroll_search(&limited(spec(false)), &mut q, &mut surface, 10)
            .await
            .unwrap();
        assert_eq!(outcome.scrolls(), 0);
        assert_eq!(surface.drags, 0);
        assert_eq!(surface.clicks.len(), 1);
        assert_eq!(q.get(OK), Some(AttrValue::bool(true)));
    }

    #[tokio::test]
    async fn absent_target_scrolls_exactly_once_on_a_still_list() {
        let mut surface = ListSurface::new(&["14/01/2024", "13/01/2024", "12/01/2024"]);
        let mut q = question("15/01/2024");
        let outcome = scroll_search(&limited(spec(false)), &mut q, &mut surface, 10)
            .await
            .unwrap();
        assert_eq!(outcome, ScrollOutcome::Exhausted { scrolls: 1 });
        assert_eq!(surface.drags, 1);
        assert!(surface.clicks.is_empty());
        assert_eq!(q.get(OK), Some(AttrValue::bool(false)));
    }

    #[tokio::test]
    async fn finds_row_on_a_later_page() {
        let mut surface = ListSurface::new(&[
            "14/01/2024",
            "13/01/2024",
            "12/01/2024",
            "11/01/2024",
            "total",
            "05/01/2024",
        ]);
        let mut q = question("15/01/2024");
        let outcome = scroll_search(&limited(spec(true)), &mut q, &mut surface, 10)
            .await
            .unwrap();
        match outcome {
            ScrollOutcome::Found { area, scrolls } => {
                assert_eq!(scrolls, 1);
                assert!((area.start().y() - 0.4).abs() < 1e-9);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        match q.get("Listatransacoes") {
            Some(AttrValue::List(items)) => assert_eq!(items.len(), 6),
            other => panic!("unexpected extra readings {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_list_stops_immediately() {
        let mut surface = ListSurface::new(&[]);
        let mut q = question("15/01/2024");
        let outcome = scroll_search(&limited(spec(false)), &mut q, &mut surface, 10)
            .await
            .unwrap();
        assert_eq!(outcome, ScrollOutcome::Exhausted { scrolls: 0 });
    }

    #[tokio::test]
    async fn pass_limit_bounds_a_moving_list() {
        let mut surface = ListSurface::new(&[]);
        // Every page has a distinct first row and no dates.
        surface.rows = (0..60)
            .map(|i| if i % 3 == 0 { i.to_string() } else { "x".to_string() })
            .collect();
        let mut q = question("15/01/2024");
        let outcome = scroll_search(&limited(spec(false)), &mut q, &mut surface, 4)
            .await
            .unwrap();
        assert_eq!(outcome, ScrollOutcome::PassLimit { scrolls: 3 });
    }

    #[tokio::test]
    async fn unparseable_reference_is_fatal() {
        let mut surface = ListSurface::new(&["01/01/2024"]);
        let mut q = question("amanhã");
        let err = scroll_search(&limited(spec(false)), &mut q, &mut surface, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidDate(_)));
    }

    #[test]
    fn parses_recorded_descriptor() {
        let value = json!([
            ".Limite",
            [[0.3, 0.5], [0.3, 0.2]],
            [[0.1, 0.2], [0.4, 0.25]],
            [[0.1, 0.3], [0.1, 0.4]],
            ".Listatransacoes",
            [[0.5, 0.0], [0.5, 0.0]]
        ]);
        let parsed = ScrollSpec::from_value(&value).unwrap();
        assert_eq!(parsed, limited(spec(true)));
        assert_eq!(ScrollSpec::from_value(&parsed.to_value()).unwrap(), parsed);

        let short = json!([".Limite", [[0, 0], [1, 1]], [[0, 0], [1, 1]], [], "", null]);
        assert!(ScrollSpec::from_value(&short).unwrap().extra.is_none());
    }
}
