use serde::Deserialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum EnvelopeError {
    ParseError(String),
    NotAnObject,
    EmptyObject,
    MultipleKeys(Vec<String>),
    UnknownKind(String),
    ShapeError(String),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::ParseError(msg) => write!(f, "Response is not valid JSON: {}", msg),
            EnvelopeError::NotAnObject => write!(f, "Response is not a JSON object"),
            EnvelopeError::EmptyObject => write!(f, "Response object has no keys"),
            EnvelopeError::MultipleKeys(keys) => {
                write!(f, "Response object has multiple keys: {}", keys.join(", "))
            }
            EnvelopeError::UnknownKind(kind) => {
                write!(f, "Unknown response kind: '{}'", kind)
            }
            EnvelopeError::ShapeError(msg) => write!(f, "Malformed response payload: {}", msg),
        }
    }
}

impl Error for EnvelopeError {}

/// Table payload: ordered column names plus rows of values, passed through
/// untouched.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TabularData {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

/// Chart payload, normalized to (label, value) points. The model produces
/// two shapes in the wild: rows of [label, value] pairs, or parallel
/// `columns`/scalar-`data` lists. Both normalize here.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    pub columns: Vec<String>,
    pub points: Vec<(String, Value)>,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    columns: Vec<String>,
    data: Vec<Value>,
}

/// The single-key response envelope the model is instructed to emit, as an
/// explicit tagged variant rather than a runtime key lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Answer(String),
    Table(TabularData),
    Bar(SeriesData),
    Line(SeriesData),
}

/// Removes the Markdown code-fence markers some model responses wrap their
/// JSON in. Literal substring removal: wrapping then stripping restores the
/// original text exactly.
pub fn strip_code_fences(response: &str) -> String {
    response.replace("```json\n", "").replace("\n```", "")
}

impl Envelope {
    /// Parses a raw model response into a validated envelope.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let cleaned = strip_code_fences(raw);

        let value: Value = serde_json::from_str(cleaned.trim())
            .map_err(|e| EnvelopeError::ParseError(e.to_string()))?;

        let object = match value {
            Value::Object(map) => map,
            _ => return Err(EnvelopeError::NotAnObject),
        };

        if object.is_empty() {
            return Err(EnvelopeError::EmptyObject);
        }
        if object.len() > 1 {
            return Err(EnvelopeError::MultipleKeys(
                object.keys().cloned().collect(),
            ));
        }

        let (kind, payload) = object
            .into_iter()
            .next()
            .ok_or(EnvelopeError::EmptyObject)?;

        match kind.as_str() {
            "answer" => match payload {
                Value::String(text) => Ok(Envelope::Answer(text)),
                other => Err(EnvelopeError::ShapeError(format!(
                    "'answer' must be a string, got {}",
                    type_name(&other)
                ))),
            },
            "table" => {
                let table: TabularData = serde_json::from_value(payload)
                    .map_err(|e| EnvelopeError::ShapeError(e.to_string()))?;
                Ok(Envelope::Table(table))
            }
            "bar" => Ok(Envelope::Bar(parse_series(payload)?)),
            "line" => Ok(Envelope::Line(parse_series(payload)?)),
            other => Err(EnvelopeError::UnknownKind(other.to_string())),
        }
    }
}

fn parse_series(payload: Value) -> Result<SeriesData, EnvelopeError> {
    let raw: RawSeries =
        serde_json::from_value(payload).map_err(|e| EnvelopeError::ShapeError(e.to_string()))?;

    let all_rows = !raw.data.is_empty() && raw.data.iter().all(Value::is_array);

    let points = if all_rows {
        // Rows of [label, value] pairs
        let mut points = Vec::with_capacity(raw.data.len());
        for value in &raw.data {
            let Some(row) = value.as_array() else {
                return Err(EnvelopeError::ShapeError(
                    "chart data mixes rows and scalars".to_string(),
                ));
            };
            if row.len() < 2 {
                return Err(EnvelopeError::ShapeError(
                    "chart rows need a label and a value".to_string(),
                ));
            }
            points.push((label_of(&row[0]), row[1].clone()));
        }
        points
    } else {
        // Parallel columns/data lists
        if raw.columns.len() != raw.data.len() {
            return Err(EnvelopeError::ShapeError(format!(
                "chart has {} labels but {} values",
                raw.columns.len(),
                raw.data.len()
            )));
        }
        raw.columns
            .iter()
            .cloned()
            .zip(raw.data.iter().cloned())
            .collect()
    };

    Ok(SeriesData {
        columns: raw.columns,
        points,
    })
}

fn label_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fence_wrap_then_strip_round_trips() {
        let original = r#"{"answer": "The title with the highest rating is 'Gilead'"}"#;
        let fenced = format!("```json\n{}\n```", original);
        assert_eq!(strip_code_fences(&fenced), original);

        // Unfenced responses pass through untouched
        assert_eq!(strip_code_fences(original), original);
    }

    #[test]
    fn parses_answer_verbatim() {
        let envelope = Envelope::parse(r#"{"answer": "X"}"#).unwrap();
        assert_eq!(envelope, Envelope::Answer("X".to_string()));
    }

    #[test]
    fn parses_fenced_answer() {
        let envelope = Envelope::parse("```json\n{\"answer\": \"42\"}\n```").unwrap();
        assert_eq!(envelope, Envelope::Answer("42".to_string()));
    }

    #[test]
    fn parses_table_rows_verbatim() {
        let raw = r#"{"table": {"columns": ["title", "ratings_count"], "data": [["Gilead", 361]]}}"#;
        match Envelope::parse(raw).unwrap() {
            Envelope::Table(table) => {
                assert_eq!(table.columns, vec!["title", "ratings_count"]);
                assert_eq!(table.data, vec![vec![json!("Gilead"), json!(361)]]);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn parses_line_with_pair_rows() {
        let raw = r#"{"line": {"columns": ["A","B"], "data": [["x",1],["y",5]]}}"#;
        match Envelope::parse(raw).unwrap() {
            Envelope::Line(series) => {
                assert_eq!(series.columns, vec!["A", "B"]);
                assert_eq!(
                    series.points,
                    vec![("x".to_string(), json!(1)), ("y".to_string(), json!(5))]
                );
            }
            other => panic!("expected line, got {:?}", other),
        }
    }

    #[test]
    fn parses_bar_with_parallel_lists() {
        let raw = r#"{"bar": {"columns": ["A","B","C"], "data": [25, 24, 10]}}"#;
        match Envelope::parse(raw).unwrap() {
            Envelope::Bar(series) => {
                assert_eq!(series.points.len(), 3);
                assert_eq!(series.points[0], ("A".to_string(), json!(25)));
            }
            other => panic!("expected bar, got {:?}", other),
        }
    }

    #[test]
    fn unknown_kind_is_a_typed_error() {
        let err = Envelope::parse(r#"{"pie": {"columns": [], "data": []}}"#).unwrap_err();
        match err {
            EnvelopeError::UnknownKind(kind) => assert_eq!(kind, "pie"),
            other => panic!("expected UnknownKind, got {:?}", other),
        }
    }

    #[test]
    fn multiple_keys_are_rejected() {
        let err = Envelope::parse(r#"{"answer": "X", "table": {}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::MultipleKeys(keys) if keys.len() == 2));
    }

    #[test]
    fn non_json_is_a_parse_error() {
        assert!(matches!(
            Envelope::parse("I do not know."),
            Err(EnvelopeError::ParseError(_))
        ));
    }

    #[test]
    fn wrong_answer_shape_is_rejected() {
        let err = Envelope::parse(r#"{"answer": 42}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::ShapeError(_)));
    }

    #[test]
    fn mismatched_chart_lists_are_rejected() {
        let err = Envelope::parse(r#"{"bar": {"columns": ["A","B"], "data": [1]}}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::ShapeError(_)));
    }
}
