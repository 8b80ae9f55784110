use crate::llm::{LlmError, LlmManager};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

#[derive(Debug)]
pub enum RetrievalError {
    IoError(std::io::Error),
    ParsingError(String),
    EmbeddingError(LlmError),
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalError::IoError(err) => write!(f, "IO error: {}", err),
            RetrievalError::ParsingError(msg) => write!(f, "Parsing error: {}", msg),
            RetrievalError::EmbeddingError(err) => write!(f, "Embedding error: {}", err),
        }
    }
}

impl Error for RetrievalError {}

impl From<std::io::Error> for RetrievalError {
    fn from(err: std::io::Error) -> Self {
        RetrievalError::IoError(err)
    }
}

impl From<LlmError> for RetrievalError {
    fn from(err: LlmError) -> Self {
        RetrievalError::EmbeddingError(err)
    }
}

/// A known question/SQL pair used as retrieval context for the planner.
#[derive(Debug, Clone)]
pub struct FewShotExample {
    pub question: String,
    pub sql: String,
}

/// Loads the few-shot example file: a JSON object mapping question strings to
/// SQL strings. A malformed file is an error; an empty object is fine.
pub fn load_few_shots(path: &Path) -> Result<Vec<FewShotExample>, RetrievalError> {
    let raw = std::fs::read_to_string(path)?;
    parse_few_shots(&raw)
}

pub fn parse_few_shots(raw: &str) -> Result<Vec<FewShotExample>, RetrievalError> {
    let map: HashMap<String, String> =
        serde_json::from_str(raw).map_err(|e| RetrievalError::ParsingError(e.to_string()))?;

    let mut examples: Vec<FewShotExample> = map
        .into_iter()
        .map(|(question, sql)| FewShotExample { question, sql })
        .collect();

    // Deterministic order regardless of map iteration order
    examples.sort_by(|a, b| a.question.cmp(&b.question));
    Ok(examples)
}

struct IndexedExample {
    example: FewShotExample,
    embedding: Vec<f32>,
}

/// In-memory similarity index over the few-shot examples. Built once at
/// startup, read-only afterwards.
pub struct ExampleIndex {
    entries: Vec<IndexedExample>,
}

impl ExampleIndex {
    /// Embeds every example question and builds the index. An empty example
    /// list yields a valid index whose searches return nothing.
    pub async fn build(
        llm: &LlmManager,
        examples: Vec<FewShotExample>,
    ) -> Result<Self, RetrievalError> {
        if examples.is_empty() {
            info!("Few-shot example file is empty, building empty index");
            return Ok(Self {
                entries: Vec::new(),
            });
        }

        let questions: Vec<String> = examples.iter().map(|e| e.question.clone()).collect();
        let embeddings = llm.embed(&questions).await?;

        let entries = examples
            .into_iter()
            .zip(embeddings)
            .map(|(example, embedding)| IndexedExample { example, embedding })
            .collect::<Vec<_>>();

        info!("Built example index with {} entries", entries.len());
        Ok(Self { entries })
    }

    #[cfg(test)]
    fn from_embedded(pairs: Vec<(FewShotExample, Vec<f32>)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(example, embedding)| IndexedExample { example, embedding })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the `top_k` examples most similar to the query embedding,
    /// best first.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Vec<&FewShotExample> {
        let mut scored: Vec<(f32, &FewShotExample)> = self
            .entries
            .iter()
            .map(|entry| {
                (
                    cosine_similarity(query_embedding, &entry.embedding),
                    &entry.example,
                )
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, example)| example)
            .collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Formats retrieved examples as numbered question/SQL blocks for the
/// planner's tool observation.
pub fn format_examples(examples: &[&FewShotExample]) -> String {
    if examples.is_empty() {
        return "No similar examples found.".to_string();
    }

    let mut out = String::new();
    for (idx, example) in examples.iter().enumerate() {
        writeln!(out, "### Example {}", idx + 1).ok();
        writeln!(out, "Question: {}", example.question).ok();
        writeln!(out, "SQL: {}", example.sql).ok();
        writeln!(out).ok();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(question: &str, sql: &str) -> FewShotExample {
        FewShotExample {
            question: question.to_string(),
            sql: sql.to_string(),
        }
    }

    #[test]
    fn parses_question_sql_pairs() {
        let raw = r#"{"How many zip codes are there?": "SELECT COUNT(*) FROM census_data_zip_codes"}"#;
        let examples = parse_few_shots(raw).unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].question, "How many zip codes are there?");
        assert!(examples[0].sql.starts_with("SELECT COUNT(*)"));
    }

    #[test]
    fn empty_object_is_valid() {
        let examples = parse_few_shots("{}").unwrap();
        assert!(examples.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(matches!(
            parse_few_shots("not json"),
            Err(RetrievalError::ParsingError(_))
        ));
        // Non-string values are malformed too
        assert!(matches!(
            parse_few_shots(r#"{"q": 42}"#),
            Err(RetrievalError::ParsingError(_))
        ));
    }

    #[test]
    fn empty_index_returns_no_results() {
        let index = ExampleIndex::from_embedded(Vec::new());
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 4).is_empty());
    }

    #[test]
    fn search_orders_by_similarity() {
        let index = ExampleIndex::from_embedded(vec![
            (example("orthogonal", "SELECT 1"), vec![0.0, 1.0]),
            (example("aligned", "SELECT 2"), vec![1.0, 0.0]),
            (example("diagonal", "SELECT 3"), vec![1.0, 1.0]),
        ]);

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].question, "aligned");
        assert_eq!(hits[1].question, "diagonal");
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        // Mismatched or empty vectors score zero rather than panicking
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn formats_examples_for_the_planner() {
        let a = example("How many rows?", "SELECT COUNT(*) FROM t");
        let formatted = format_examples(&[&a]);
        assert!(formatted.contains("### Example 1"));
        assert!(formatted.contains("Question: How many rows?"));
        assert!(formatted.contains("SQL: SELECT COUNT(*) FROM t"));

        assert_eq!(format_examples(&[]), "No similar examples found.");
    }
}
