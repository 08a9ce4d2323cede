//! Vector search over a collection's live records. See spec.md §4.6. Pure
//! scoring and top-k selection over an already-materialized candidate set;
//! the caller (dispatch layer) is responsible for fetching `get_all` and
//! applying tombstone/modality/predicate filtering before scoring, or by
//! passing an already-narrowed candidate slice to [`search`].

use crate::predicate::Filter;
use crate::record::Record;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    L2,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Cosine
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VectorQuery {
    pub vector: Vec<f64>,
    pub k: usize,
    #[serde(default)]
    pub metric: Metric,
    pub filter: Option<Value>,
    pub modality: Option<String>,
}

fn record_vector(record: &Record) -> Option<Vec<f64>> {
    record
        .get("vector")?
        .as_array()?
        .iter()
        .map(|v| v.as_f64())
        .collect()
}

fn record_modality(record: &Record) -> Option<&str> {
    record.get("modality").and_then(Value::as_str)
}

/// Dot product over the equal-dimension prefix of the two vectors; extra
/// dimensions on the longer side are ignored, per spec.md §4.6.
fn cosine_score(query: &[f64], candidate: &[f64]) -> f64 {
    query
        .iter()
        .zip(candidate.iter())
        .map(|(a, b)| a * b)
        .sum()
}

/// Negative Euclidean distance over the equal-dimension prefix, so a
/// uniform "higher is better" comparator works for both metrics.
fn l2_score(query: &[f64], candidate: &[f64]) -> f64 {
    let sum_sq: f64 = query
        .iter()
        .zip(candidate.iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum();
    -sum_sq.sqrt()
}

/// Runs a vector query over `candidates` (already the collection's live,
/// non-tombstone records). Applies modality and predicate filtering, scores
/// every remaining record, selects the top `query.k` by score, and attaches
/// a `score` field to each returned record. Ties are broken by earlier
/// occurrence in `candidates`, since a stable sort preserves input order
/// among equal keys.
pub fn search(candidates: Vec<Record>, query: &VectorQuery) -> Vec<Record> {
    let filter = query.filter.as_ref().map(Filter::parse);

    let mut scored: Vec<(f64, Record)> = candidates
        .into_iter()
        .filter_map(|record| {
            let vector = record_vector(&record)?;
            if let Some(modality) = &query.modality {
                if record_modality(&record) != Some(modality.as_str()) {
                    return None;
                }
            }
            if let Some(filter) = &filter {
                if !filter.eval(&record) {
                    return None;
                }
            }
            let score = match query.metric {
                Metric::Cosine => cosine_score(&query.vector, &vector),
                Metric::L2 => l2_score(&query.vector, &vector),
            };
            Some((score, record))
        })
        .collect();

    // stable sort descending by score; ties keep the original (earlier
    // occurrence) relative order
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(query.k);

    scored
        .into_iter()
        .map(|(score, mut record)| {
            record.insert("score".to_string(), serde_json::json!(score));
            record
        })
        .collect()
}
