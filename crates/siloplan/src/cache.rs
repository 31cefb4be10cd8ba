// Copyright 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Tag-versioned binary caching.
//!
//! Cached values are wrapped in an envelope carrying a schema tag; the tag
//! must be bumped whenever the cached type changes shape. A missing,
//! undecodable or differently-tagged cache file is never an error, it only
//! means the value is rebuilt.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct Tagged<T> {
    tag: String,
    value: T,
}

#[derive(Serialize)]
struct TaggedRef<'a, T> {
    tag: &'a str,
    value: &'a T,
}

/// Decode the value at `path` if its tag matches, otherwise run `build`
/// and store the tagged result atomically.
pub fn tagged_decode_or_load<T, F>(path: &Path, tag: &str, build: F) -> anyhow::Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> anyhow::Result<T>,
{
    if let Ok(bytes) = std::fs::read(path) {
        match bincode::deserialize::<Tagged<T>>(&bytes) {
            Ok(tagged) if tagged.tag == tag => {
                log::debug!("cache hit at {}", path.display());
                return Ok(tagged.value);
            }
            Ok(tagged) => {
                log::debug!(
                    "cache tag mismatch at {} (`{}`, wanted `{}`), rebuilding",
                    path.display(),
                    tagged.tag,
                    tag
                );
            }
            Err(e) => {
                log::debug!("undecodable cache at {} ({}), rebuilding", path.display(), e);
            }
        }
    }

    let value = build()?;
    let data = bincode::serialize(&TaggedRef { tag, value: &value })
        .context("failed to encode cache value")?;
    write_atomic(path, &data)
        .with_context(|| format!("failed to write cache file `{}`", path.display()))?;
    Ok(value)
}

/// Write a file through a temporary sibling plus rename, so readers only
/// ever observe complete contents.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    type Value = BTreeMap<String, u32>;

    fn sample() -> Value {
        [("a".to_string(), 1), ("b".to_string(), 2)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_build_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.bin");

        let built = tagged_decode_or_load(&path, "v1", || Ok(sample())).unwrap();
        assert_eq!(built, sample());
        assert!(path.exists());

        // second load must not invoke the builder
        let cached: Value =
            tagged_decode_or_load(&path, "v1", || anyhow::bail!("builder re-ran")).unwrap();
        assert_eq!(cached, sample());
    }

    #[test]
    fn test_tag_mismatch_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        tagged_decode_or_load(&path, "v1", || Ok(sample())).unwrap();
        let rebuilt: Value = tagged_decode_or_load(&path, "v2", || {
            Ok([("rebuilt".to_string(), 9)].into_iter().collect())
        })
        .unwrap();
        assert_eq!(rebuilt.get("rebuilt"), Some(&9));

        // the new tag is now stored
        let cached: Value =
            tagged_decode_or_load(&path, "v2", || anyhow::bail!("builder re-ran")).unwrap();
        assert_eq!(cached, rebuilt);
    }

    #[test]
    fn test_garbage_cache_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        std::fs::write(&path, b"not a cache").unwrap();

        let rebuilt: Value = tagged_decode_or_load(&path, "v1", || Ok(sample())).unwrap();
        assert_eq!(rebuilt, sample());
    }
}
