// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;

/// Flattens an `atomicwrites` error into the underlying I/O error.
pub(crate) fn flatten_atomic(err: atomicwrites::Error<std::io::Error>) -> std::io::Error {
    match err {
        atomicwrites::Error::Internal(err) | atomicwrites::Error::User(err) => err,
    }
}

/// Returns the last `n` lines of the file at `path`, if readable.
pub(crate) fn tail_lines(path: &Utf8Path, n: usize) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(n);
            lines[start..].iter().map(|line| line.to_string()).collect()
        }
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;

    #[test]
    fn tail_lines_short_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log");
        std::fs::write(&path, "a\nb\nc\n").unwrap();
        assert_eq!(tail_lines(&path, 2), vec!["b", "c"]);
        assert_eq!(tail_lines(&path, 10), vec!["a", "b", "c"]);
        assert_eq!(tail_lines(&dir.path().join("missing"), 2), Vec::<String>::new());
    }
}
