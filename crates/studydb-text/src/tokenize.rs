/// Whitespace tokenization. No lowercasing, stemming or stop-word removal:
/// `"Cell cell,"` yields `["Cell", "cell,"]`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

pub fn tokenize_all<S: AsRef<str>>(texts: &[S]) -> Vec<Vec<String>> {
    texts.iter().map(|t| tokenize(t.as_ref())).collect()
}
