use crate::envelope::{Envelope, SeriesData};
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum RenderError {
    NonNumericValue { label: String, value: Value },
    EmptySeries,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NonNumericValue { label, value } => {
                write!(f, "Chart value for '{}' is not numeric: {}", label, value)
            }
            RenderError::EmptySeries => write!(f, "Chart has no data points"),
        }
    }
}

impl Error for RenderError {}

/// One (label, value) chart point.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// The render model handed to the UI, tagged by kind.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderedOutput {
    Text {
        text: String,
    },
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    BarChart {
        columns: Vec<String>,
        points: Vec<ChartPoint>,
    },
    LineChart {
        columns: Vec<String>,
        points: Vec<ChartPoint>,
        /// Exact [min, max] of the values, fixed as the chart's value axis
        y_domain: (f64, f64),
    },
}

/// Turns a validated envelope into its render model. Table data passes
/// through verbatim; chart values must be numeric.
pub fn render(envelope: Envelope) -> Result<RenderedOutput, RenderError> {
    match envelope {
        Envelope::Answer(text) => Ok(RenderedOutput::Text { text }),
        Envelope::Table(table) => Ok(RenderedOutput::Table {
            columns: table.columns,
            rows: table.data,
        }),
        Envelope::Bar(series) => {
            let points = numeric_points(&series)?;
            Ok(RenderedOutput::BarChart {
                columns: series.columns,
                points,
            })
        }
        Envelope::Line(series) => {
            let points = numeric_points(&series)?;
            let y_domain = value_domain(&points)?;
            Ok(RenderedOutput::LineChart {
                columns: series.columns,
                points,
                y_domain,
            })
        }
    }
}

fn numeric_points(series: &SeriesData) -> Result<Vec<ChartPoint>, RenderError> {
    series
        .points
        .iter()
        .map(|(label, value)| match value.as_f64() {
            Some(number) => Ok(ChartPoint {
                label: label.clone(),
                value: number,
            }),
            None => Err(RenderError::NonNumericValue {
                label: label.clone(),
                value: value.clone(),
            }),
        })
        .collect()
}

fn value_domain(points: &[ChartPoint]) -> Result<(f64, f64), RenderError> {
    let mut values = points.iter().map(|p| p.value);
    let first = values.next().ok_or(RenderError::EmptySeries)?;

    let mut min = first;
    let mut max = first;
    for value in values {
        if value < min {
            min = value;
        }
        if value > max {
            max = value;
        }
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_renders_verbatim() {
        let output = render(Envelope::parse(r#"{"answer": "X"}"#).unwrap()).unwrap();
        assert_eq!(
            output,
            RenderedOutput::Text {
                text: "X".to_string()
            }
        );
    }

    #[test]
    fn line_chart_domain_is_exact_min_max() {
        let raw = r#"{"line": {"columns": ["A","B"], "data": [["x",1],["y",5]]}}"#;
        let output = render(Envelope::parse(raw).unwrap()).unwrap();

        match output {
            RenderedOutput::LineChart {
                points, y_domain, ..
            } => {
                assert_eq!(y_domain, (1.0, 5.0));
                assert_eq!(points.len(), 2);
                assert_eq!(points[0].label, "x");
                assert_eq!(points[0].value, 1.0);
            }
            other => panic!("expected line chart, got {:?}", other),
        }
    }

    #[test]
    fn table_renders_rows_and_columns_verbatim() {
        // The column literally named after the old coercion sentinel doesn't
        // exist here, so nothing is coerced
        let raw = r#"{"table": {"columns": ["title", "ratings_count"], "data": [["Gilead", 361]]}}"#;
        let output = render(Envelope::parse(raw).unwrap()).unwrap();

        match output {
            RenderedOutput::Table { columns, rows } => {
                assert_eq!(columns, vec!["title", "ratings_count"]);
                assert_eq!(rows, vec![vec![json!("Gilead"), json!(361)]]);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn bar_chart_requires_numeric_values() {
        let raw = r#"{"bar": {"columns": ["A","B"], "data": [["x","lots"],["y",2]]}}"#;
        let err = render(Envelope::parse(raw).unwrap()).unwrap_err();
        assert!(matches!(err, RenderError::NonNumericValue { label, .. } if label == "x"));
    }

    #[test]
    fn empty_line_series_is_an_error() {
        let raw = r#"{"line": {"columns": [], "data": []}}"#;
        let err = render(Envelope::parse(raw).unwrap()).unwrap_err();
        assert!(matches!(err, RenderError::EmptySeries));
    }

    #[test]
    fn render_model_serializes_with_kind_tag() {
        let output = render(Envelope::parse(r#"{"answer": "hi"}"#).unwrap()).unwrap();
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["kind"], "text");
        assert_eq!(value["text"], "hi");
    }
}
