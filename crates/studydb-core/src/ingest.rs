//! Ingestion boundary.
//!
//! Extraction collaborators hand over content in one of a few shapes (raw
//! text, a list of documents, or chunks they already split). `IngestInput`
//! names those shapes once; the retrieval core only ever sees the resulting
//! ordered chunk texts.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::splitter::TextSplitter;
use crate::types::Meta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl SourceDocument {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self { page_content: page_content.into(), metadata: Meta::new() }
    }

    /// Read a text file; invalid UTF-8 is replaced rather than rejected.
    pub fn from_path(path: &Path) -> Result<Self> {
        let page_content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => String::from_utf8_lossy(&fs::read(path)?).to_string(),
        };
        let mut metadata = Meta::new();
        metadata.insert("source".to_string(), path.to_string_lossy().to_string());
        Ok(Self { page_content, metadata })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum IngestInput {
    /// One document's worth of text, e.g. a joined video transcript.
    Text(String),
    Documents(Vec<SourceDocument>),
    /// Chunks already split upstream; taken verbatim.
    Chunks(Vec<String>),
}

impl IngestInput {
    /// Classify a loosely-shaped JSON payload:
    /// - `{"documents": [...]}` -> documents
    /// - any other object -> its JSON text as one document
    /// - array -> documents (objects use `page_content`/`metadata`, other values their text)
    /// - string or scalar -> text
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(mut map) => match map.remove("documents") {
                Some(Value::Array(items)) => Self::Documents(items.into_iter().map(document_from_value).collect()),
                Some(other) => Self::Documents(vec![document_from_value(other)]),
                None => Self::Text(Value::Object(map).to_string()),
            },
            Value::Array(items) => Self::Documents(items.into_iter().map(document_from_value).collect()),
            Value::String(text) => Self::Text(text),
            other => Self::Text(other.to_string()),
        }
    }

    /// Resolve into the ordered chunk texts handed to the indexer.
    pub fn into_chunks(self, splitter: &TextSplitter) -> Vec<String> {
        match self {
            Self::Text(text) => splitter.split(&text),
            Self::Documents(docs) => docs.iter().flat_map(|d| splitter.split(&d.page_content)).collect(),
            Self::Chunks(chunks) => chunks,
        }
    }
}

fn document_from_value(value: Value) -> SourceDocument {
    match value {
        Value::Object(mut map) => {
            let metadata = match map.remove("metadata") {
                Some(Value::Object(meta)) => meta.into_iter().map(|(k, v)| (k, value_text(v))).collect(),
                _ => Meta::new(),
            };
            let page_content = match map.remove("page_content") {
                Some(content) => value_text(content),
                None => Value::Object(map).to_string(),
            };
            SourceDocument { page_content, metadata }
        }
        other => SourceDocument::new(value_text(other)),
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// All `.txt` files under `root` (or `root` itself when it is a file), sorted.
pub fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }
    let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("txt"))
        .map(|e| e.path().to_path_buf())
        .collect();
    txt_files.sort();
    txt_files
}

/// Load every text file under the given paths as one document each.
pub fn load_text_documents(paths: &[PathBuf]) -> Result<Vec<SourceDocument>> {
    let mut docs = Vec::new();
    for root in paths {
        let files = list_txt_files(root);
        if files.is_empty() {
            tracing::warn!(path = %root.display(), "no .txt files found");
        }
        for file in files {
            tracing::debug!(file = %file.display(), "reading document");
            docs.push(SourceDocument::from_path(&file)?);
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn documents_key_selects_document_list() {
        let input = IngestInput::from_json(json!({
            "documents": [
                {"page_content": "cells divide", "metadata": {"source": "bio.pdf", "page": 3}},
                "loose string",
            ]
        }));
        let IngestInput::Documents(docs) = input else { panic!("expected documents") };
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page_content, "cells divide");
        assert_eq!(docs[0].metadata.get("page").map(String::as_str), Some("3"));
        assert_eq!(docs[1].page_content, "loose string");
    }

    #[test]
    fn object_without_documents_is_whole_text() {
        let input = IngestInput::from_json(json!({"title": "x"}));
        assert_eq!(input, IngestInput::Text("{\"title\":\"x\"}".to_string()));
    }

    #[test]
    fn string_is_text() {
        assert_eq!(IngestInput::from_json(json!("hello")), IngestInput::Text("hello".to_string()));
    }

    #[test]
    fn chunks_are_taken_verbatim() {
        let chunks = vec!["  a  ".to_string(), "b".to_string()];
        let out = IngestInput::Chunks(chunks.clone()).into_chunks(&TextSplitter::default());
        assert_eq!(out, chunks);
    }

    #[test]
    fn documents_split_in_order() {
        let splitter = TextSplitter::new(10, 0).unwrap();
        let input = IngestInput::Documents(vec![SourceDocument::new("first doc"), SourceDocument::new("second")]);
        assert_eq!(input.into_chunks(&splitter), vec!["first doc", "second"]);
    }
}
