use serde::{Deserialize, Serialize};

use studydb_core::error::{Error, Result};
use studydb_core::types::{SearchHit, SourceKind};

/// Flat (brute-force) index over squared Euclidean distance.
///
/// Vectors are stored row-major; row `i` is the embedding of chunk position `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticIndex {
    dim: usize,
    rows: Option<Rows>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Rows {
    count: usize,
    data: Vec<f32>,
}

impl SemanticIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, rows: None }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_ready(&self) -> bool {
        self.rows.is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.as_ref().map_or(0, |r| r.count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the index contents; `embeddings[i]` belongs to position `i`.
    pub fn build(&mut self, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.is_empty() {
            return Err(Error::BuildFailure("cannot build a semantic index over zero chunks".to_string()));
        }
        let mut data = Vec::with_capacity(embeddings.len() * self.dim);
        for (pos, v) in embeddings.iter().enumerate() {
            if v.len() != self.dim {
                return Err(Error::BuildFailure(format!(
                    "embedding {pos} has dimension {}, index expects {}",
                    v.len(),
                    self.dim
                )));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(Error::BuildFailure(format!("embedding {pos} contains non-finite values")));
            }
            data.extend_from_slice(v);
        }
        tracing::debug!(chunks = embeddings.len(), dim = self.dim, "built semantic index");
        self.rows = Some(Rows { count: embeddings.len(), data });
        Ok(())
    }

    /// The `top_n` closest chunks, nearest first, ties going to the lower position.
    /// `score` carries the squared distance.
    pub fn search(&self, query: &[f32], top_n: usize) -> Result<Vec<SearchHit>> {
        let rows = self.rows.as_ref().ok_or(Error::IndexNotReady("semantic index has not been built"))?;
        if query.len() != self.dim {
            return Err(Error::Retrieval(format!(
                "query embedding has dimension {}, index expects {}",
                query.len(),
                self.dim
            )));
        }
        let mut ranked: Vec<(usize, f32)> = rows
            .data
            .chunks_exact(self.dim.max(1))
            .take(rows.count)
            .map(|row| squared_l2(row, query))
            .enumerate()
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        ranked.truncate(top_n);
        Ok(ranked
            .into_iter()
            .map(|(position, distance)| SearchHit { position, score: distance, source: SourceKind::Semantic })
            .collect())
    }

    /// Structural check for an index read back from storage.
    pub fn validate(&self) -> Result<()> {
        let rows = self.rows.as_ref().ok_or(Error::IndexNotReady("semantic index has not been built"))?;
        if self.dim == 0 || rows.count == 0 || rows.data.len() != rows.count * self.dim {
            return Err(Error::BuildFailure(format!(
                "semantic index holds {} values for {} rows of dimension {}",
                rows.data.len(),
                rows.count,
                self.dim
            )));
        }
        Ok(())
    }
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(rows: &[[f32; 2]]) -> SemanticIndex {
        let mut index = SemanticIndex::new(2);
        index.build(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap();
        index
    }

    #[test]
    fn search_before_build_is_not_ready() {
        let index = SemanticIndex::new(2);
        assert!(matches!(index.search(&[0.0, 0.0], 1), Err(Error::IndexNotReady(_))));
    }

    #[test]
    fn nearest_first_with_squared_distance() {
        let index = built(&[[3.0, 0.0], [1.0, 0.0], [0.0, 2.0]]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let got: Vec<(usize, f32)> = hits.iter().map(|h| (h.position, h.score)).collect();
        assert_eq!(got, vec![(1, 1.0), (2, 4.0), (0, 9.0)]);
    }

    #[test]
    fn ties_go_to_lower_position() {
        let index = built(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]]);
        let hits = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits.iter().map(|h| h.position).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn top_n_larger_than_corpus_returns_all() {
        let index = built(&[[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(index.search(&[0.0, 0.0], 10).unwrap().len(), 2);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut index = SemanticIndex::new(3);
        assert!(matches!(index.build(&[vec![1.0, 2.0]]), Err(Error::BuildFailure(_))));
        index.build(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert!(matches!(index.search(&[1.0], 1), Err(Error::Retrieval(_))));
    }

    #[test]
    fn empty_build_fails() {
        let mut index = SemanticIndex::new(2);
        assert!(matches!(index.build(&[]), Err(Error::BuildFailure(_))));
    }

    #[test]
    fn truncated_storage_fails_validation() {
        let index = built(&[[1.0, 0.0], [0.0, 1.0]]);
        let mut json: serde_json::Value = serde_json::to_value(&index).unwrap();
        json["rows"]["data"].as_array_mut().unwrap().pop();
        let restored: SemanticIndex = serde_json::from_value(json).unwrap();
        assert!(matches!(restored.validate(), Err(Error::BuildFailure(_))));
    }
}
