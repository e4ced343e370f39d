// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

use snafu::ResultExt;

use crate::{Result, error::IoSnafu};

const PUSH_CHECKPOINT_SUFFIX: &str = "_push.fq";
const POP_CHECKPOINT_SUFFIX: &str = "_pop.fq";

/// Generates a segment file name: `<prefix>.<index>`.
pub fn segment_file_name(prefix: &str, index: u64) -> String { format!("{prefix}.{index}") }

/// Returns full path to a segment file: `dir/<prefix>.<index>`.
pub fn segment_path<P: AsRef<Path>>(dir: P, prefix: &str, index: u64) -> PathBuf {
    dir.as_ref().join(segment_file_name(prefix, index))
}

/// Returns the writer checkpoint path: `dir/<prefix>_push.fq`.
pub fn push_checkpoint_path<P: AsRef<Path>>(dir: P, prefix: &str) -> PathBuf {
    dir.as_ref().join(format!("{prefix}{PUSH_CHECKPOINT_SUFFIX}"))
}

/// Returns the reader checkpoint path: `dir/<prefix>_pop.fq`.
pub fn pop_checkpoint_path<P: AsRef<Path>>(dir: P, prefix: &str) -> PathBuf {
    dir.as_ref().join(format!("{prefix}{POP_CHECKPOINT_SUFFIX}"))
}

/// Parses the index out of a segment file name, if it belongs to `prefix`.
pub fn parse_segment_index(file_name: &str, prefix: &str) -> Option<u64> {
    let digits = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lists the indices of all segment files for `prefix` under `dir`, sorted.
pub fn scan_segments<P: AsRef<Path>>(dir: P, prefix: &str) -> Result<Vec<u64>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut indices = Vec::new();
    for entry in std::fs::read_dir(dir).context(IoSnafu { path: dir })? {
        let entry = entry.context(IoSnafu { path: dir })?;
        if let Some(index) = entry
            .file_name()
            .to_str()
            .and_then(|name| parse_segment_index(name, prefix))
        {
            indices.push(index);
        }
    }

    indices.sort_unstable();
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_segment_path() {
        let path = segment_path("/data/recordlog", "logic", 12);
        assert_eq!(path, PathBuf::from("/data/recordlog/logic.12"));
    }

    #[test]
    fn test_checkpoint_paths() {
        assert_eq!(
            push_checkpoint_path("/conf", "logic"),
            PathBuf::from("/conf/logic_push.fq")
        );
        assert_eq!(
            pop_checkpoint_path("/conf", "logic"),
            PathBuf::from("/conf/logic_pop.fq")
        );
    }

    #[test_case("logic.0", Some(0) ; "first segment")]
    #[test_case("logic.137", Some(137) ; "multi digit")]
    #[test_case("logic.", None ; "missing index")]
    #[test_case("logic.1a", None ; "non numeric")]
    #[test_case("logic_push.fq", None ; "checkpoint file")]
    #[test_case("other.3", None ; "foreign prefix")]
    fn test_parse_segment_index(name: &str, expected: Option<u64>) {
        assert_eq!(parse_segment_index(name, "logic"), expected);
    }

    #[test]
    fn test_scan_segments() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let base = temp_dir.path();

        for index in [10, 2, 0] {
            std::fs::File::create(segment_path(base, "logic", index)).unwrap();
        }
        std::fs::File::create(base.join("logic_pop.fq")).unwrap();
        std::fs::File::create(base.join("other.1")).unwrap();

        assert_eq!(scan_segments(base, "logic").unwrap(), vec![0, 2, 10]);
    }

    #[test]
    fn test_scan_missing_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent");
        assert!(scan_segments(missing, "logic").unwrap().is_empty());
    }
}
