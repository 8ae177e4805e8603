use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use studydb_core::config::Bm25Settings;
use studydb_core::error::{Error, Result};
use studydb_core::types::{SearchHit, SourceKind};

/// BM25 (Okapi) ranking over one session's tokenized chunks.
///
/// `idf(t) = ln(N - n_t + 0.5) - ln(n_t + 0.5)`; terms whose idf comes out
/// negative (present in more than half the chunks) are floored to
/// `epsilon * mean_idf` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalIndex {
    params: Bm25Settings,
    corpus: Option<Corpus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Corpus {
    /// Per chunk, term -> occurrences.
    doc_freqs: Vec<BTreeMap<String, u32>>,
    doc_len: Vec<u32>,
    avgdl: f64,
    idf: BTreeMap<String, f64>,
}

impl LexicalIndex {
    pub fn new(params: Bm25Settings) -> Self {
        Self { params, corpus: None }
    }

    pub fn params(&self) -> &Bm25Settings {
        &self.params
    }

    pub fn is_ready(&self) -> bool {
        self.corpus.is_some()
    }

    /// Number of indexed chunks (0 before `build`).
    pub fn len(&self) -> usize {
        self.corpus.as_ref().map_or(0, |c| c.doc_len.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the index contents with `docs`, position `i` being `docs[i]`.
    pub fn build(&mut self, docs: &[Vec<String>]) -> Result<()> {
        if docs.is_empty() {
            return Err(Error::BuildFailure("cannot build a lexical index over zero chunks".to_string()));
        }

        let mut doc_freqs = Vec::with_capacity(docs.len());
        let mut doc_len = Vec::with_capacity(docs.len());
        let mut containing: BTreeMap<String, u32> = BTreeMap::new();
        let mut total_len = 0u64;
        for doc in docs {
            let mut freqs: BTreeMap<String, u32> = BTreeMap::new();
            for token in doc {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *containing.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += doc.len() as u64;
            doc_len.push(doc.len() as u32);
            doc_freqs.push(freqs);
        }

        let n = docs.len() as f64;
        let mut idf = BTreeMap::new();
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, count) in containing {
            let count = f64::from(count);
            let value = (n - count + 0.5).ln() - (count + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }
        if !idf.is_empty() {
            let floor = self.params.epsilon * (idf_sum / idf.len() as f64);
            for term in negative {
                idf.insert(term, floor);
            }
        }

        let avgdl = total_len as f64 / n;
        tracing::debug!(chunks = docs.len(), vocabulary = idf.len(), avgdl, "built lexical index");
        self.corpus = Some(Corpus { doc_freqs, doc_len, avgdl, idf });
        Ok(())
    }

    /// BM25 score of every chunk, indexed by position.
    pub fn scores<S: AsRef<str>>(&self, query_tokens: &[S]) -> Result<Vec<f64>> {
        let corpus = self.corpus.as_ref().ok_or(Error::IndexNotReady("lexical index has not been built"))?;
        let k1 = self.params.k1;
        let b = self.params.b;
        let mut scores = vec![0.0f64; corpus.doc_len.len()];
        for token in query_tokens {
            let token = token.as_ref();
            let Some(&idf) = corpus.idf.get(token) else { continue };
            for (pos, freqs) in corpus.doc_freqs.iter().enumerate() {
                let Some(&tf) = freqs.get(token) else { continue };
                let tf = f64::from(tf);
                let len_norm = 1.0 - b + b * f64::from(corpus.doc_len[pos]) / corpus.avgdl;
                scores[pos] += idf * (tf * (k1 + 1.0) / (tf + k1 * len_norm));
            }
        }
        Ok(scores)
    }

    /// The `top_n` best chunks, best first, ties going to the lower position.
    ///
    /// Chunks without any matching term score zero and are ranked after every
    /// matching chunk, so they only appear when fewer than `top_n` chunks match.
    pub fn search<S: AsRef<str>>(&self, query_tokens: &[S], top_n: usize) -> Result<Vec<SearchHit>> {
        let scores = self.scores(query_tokens)?;
        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(top_n);
        Ok(ranked
            .into_iter()
            .map(|(position, score)| SearchHit { position, score: score as f32, source: SourceKind::Lexical })
            .collect())
    }

    /// Structural check for an index read back from storage.
    pub fn validate(&self) -> Result<()> {
        let corpus = self.corpus.as_ref().ok_or(Error::IndexNotReady("lexical index has not been built"))?;
        if corpus.doc_freqs.len() != corpus.doc_len.len() {
            return Err(Error::BuildFailure(format!(
                "lexical index has {} term tables for {} chunks",
                corpus.doc_freqs.len(),
                corpus.doc_len.len()
            )));
        }
        if corpus.doc_len.is_empty() || !corpus.avgdl.is_finite() {
            return Err(Error::BuildFailure("lexical index has no usable chunks".to_string()));
        }
        for (pos, freqs) in corpus.doc_freqs.iter().enumerate() {
            let counted: u32 = freqs.values().sum();
            if counted != corpus.doc_len[pos] || freqs.keys().any(|t| !corpus.idf.contains_key(t)) {
                return Err(Error::BuildFailure(format!("lexical index entry {pos} is inconsistent")));
            }
        }
        Ok(())
    }
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new(Bm25Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::tokenize_all;
    use studydb_core::types::positions;

    fn built(texts: &[&str]) -> LexicalIndex {
        let mut index = LexicalIndex::default();
        index.build(&tokenize_all(texts)).unwrap();
        index
    }

    #[test]
    fn search_before_build_is_not_ready() {
        let index = LexicalIndex::default();
        assert!(matches!(index.search(&["cell"], 3), Err(Error::IndexNotReady(_))));
    }

    #[test]
    fn empty_corpus_fails_build() {
        let mut index = LexicalIndex::default();
        assert!(matches!(index.build(&[]), Err(Error::BuildFailure(_))));
        assert!(!index.is_ready());
    }

    #[test]
    fn matches_reference_scores() {
        // Three chunks, "cell" appears in one: idf = ln(2.5) - ln(1.5).
        let index = built(&["the cell membrane", "the nucleus", "the ribosome"]);
        let scores = index.scores(&["cell"]).unwrap();
        let idf = 2.5f64.ln() - 1.5f64.ln();
        let avgdl = 7.0 / 3.0;
        let expected = idf * (2.5 / (1.0 + 1.5 * (0.25 + 0.75 * 3.0 / avgdl)));
        assert!((scores[0] - expected).abs() < 1e-12, "{} vs {}", scores[0], expected);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn custom_parameters_score_in_double_precision() {
        let params = Bm25Settings { k1: 1.2, b: 0.6, epsilon: 0.25 };
        let mut index = LexicalIndex::new(params);
        index.build(&tokenize_all(&["the cell membrane", "the nucleus", "the ribosome"])).unwrap();
        let scores = index.scores(&["cell"]).unwrap();

        let (k1, b) = (1.2f64, 0.6f64);
        let idf = 2.5f64.ln() - 1.5f64.ln();
        let len_norm = 1.0 - b + b * 3.0 / (7.0 / 3.0);
        let expected = idf * (1.0 * (k1 + 1.0) / (1.0 + k1 * len_norm));
        assert!((scores[0] - expected).abs() < 1e-15, "{} vs {}", scores[0], expected);
    }

    #[test]
    fn common_terms_get_epsilon_floor() {
        // "the" is in all three chunks: raw idf ln(0.5) - ln(3.5) < 0.
        let index = built(&["the cell membrane", "the nucleus", "the ribosome"]);
        let corpus = index.corpus.as_ref().unwrap();
        let raw: Vec<f64> = [("cell", 1.0), ("membrane", 1.0), ("nucleus", 1.0), ("ribosome", 1.0), ("the", 3.0)]
            .iter()
            .map(|(_, n)| (3.0f64 - n + 0.5).ln() - (n + 0.5f64).ln())
            .collect();
        let mean = raw.iter().sum::<f64>() / raw.len() as f64;
        assert!((corpus.idf["the"] - 0.25 * mean).abs() < 1e-12);
    }

    #[test]
    fn zero_score_chunks_pad_by_position() {
        let index = built(&["alpha", "beta gamma", "gamma", "delta", "epsilon"]);
        let hits = index.search(&["gamma"], 4).unwrap();
        // "gamma" alone (pos 2) beats the longer chunk (pos 1); then zero scores by position.
        assert_eq!(positions(&hits), vec![2, 1, 0, 3]);
        assert_eq!(hits[2].score, 0.0);
    }

    #[test]
    fn top_n_excludes_zero_scores_when_enough_match() {
        let index = built(&["alpha", "gamma one", "gamma two", "delta", "epsilon"]);
        let hits = index.search(&["gamma"], 2).unwrap();
        assert_eq!(positions(&hits), vec![1, 2]);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn tokens_are_case_sensitive() {
        let index = built(&["Cell wall", "cell wall", "plant"]);
        let hits = index.search(&["cell"], 1).unwrap();
        assert_eq!(positions(&hits), vec![1]);
    }

    #[test]
    fn rebuild_replaces_previous_corpus() {
        let mut index = built(&["old text", "more old text"]);
        index.build(&tokenize_all(&["fresh"])).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.scores(&["old"]).unwrap(), vec![0.0]);
    }

    #[test]
    fn serialized_index_keeps_scores() {
        let index = built(&["osmosis water", "diffusion", "water cycle"]);
        let json = serde_json::to_string(&index).unwrap();
        let restored: LexicalIndex = serde_json::from_str(&json).unwrap();
        restored.validate().unwrap();
        let before = index.scores(&["water"]).unwrap();
        let after = restored.scores(&["water"]).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn validate_rejects_tampered_lengths() {
        let mut index = built(&["a b", "c"]);
        if let Some(corpus) = index.corpus.as_mut() {
            corpus.doc_len.push(4);
        }
        assert!(matches!(index.validate(), Err(Error::BuildFailure(_))));
    }
}
