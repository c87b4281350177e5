//! Regex matching over reassembled lines.

use regex::Regex;

use linewise_core::{ChunkData, SearchResult};

/// Find every match of `pattern` in the lines of `chunk`.
///
/// Line numbers are 1-based and absolute within the file; columns are
/// 1-based character offsets. Matches follow the regex engine's own
/// non-overlapping global semantics.
pub fn search_chunk(chunk: &ChunkData, pattern: &Regex) -> Vec<SearchResult> {
    let mut results = Vec::new();
    for (offset, text) in chunk.lines.iter().enumerate() {
        search_line(pattern, text, chunk.start_line + offset + 1, &mut results);
    }
    results
}

/// Append the matches of `pattern` in a single line to `out`.
pub fn search_line(pattern: &Regex, text: &str, line: usize, out: &mut Vec<SearchResult>) {
    for m in pattern.find_iter(text) {
        out.push(SearchResult {
            line,
            column: text[..m.start()].chars().count() + 1,
            matched: m.as_str().to_string(),
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_counts_characters() {
        let mut out = Vec::new();
        let pattern = Regex::new("x").unwrap();
        search_line(&pattern, "ééx", 7, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, 7);
        assert_eq!(out[0].column, 3);
    }

    #[test]
    fn test_chunk_line_numbers_are_absolute() {
        let chunk = ChunkData {
            index: 3,
            start_line: 41,
            end_line: 43,
            lines: vec!["let a = 1;".into(), "let b = a; let c = b;".into()],
            byte_offset: 900,
            size: 32,
        };
        let pattern = Regex::new(r"let \w").unwrap();
        let results = search_chunk(&chunk, &pattern);

        let positions: Vec<(usize, usize)> = results.iter().map(|r| (r.line, r.column)).collect();
        assert_eq!(positions, vec![(42, 1), (43, 1), (43, 12)]);
    }

    #[test]
    fn test_empty_matches_follow_engine() {
        let mut out = Vec::new();
        let pattern = Regex::new("z*").unwrap();
        search_line(&pattern, "ab", 1, &mut out);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| r.matched.is_empty()));
    }
}
