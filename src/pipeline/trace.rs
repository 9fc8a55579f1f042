use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};

use crate::ir::CacheKey;
use crate::models::Stage;

/// Writes prompts and raw responses per band for offline inspection.
///
/// Cache keys hold arbitrary source text, so files are named by key digest.
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_call(
        &self,
        key: &CacheKey,
        stage: Stage,
        kind: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let name = format!("{}.{}.{kind}.txt", key_digest(key), stage.as_str());
        let path = self.dir.join(name);
        let body = format!("# {key}\n{text}");
        std::fs::write(&path, body).with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }
}

#[must_use]
pub fn key_digest(key: &CacheKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    let full = hex::encode(hasher.finalize());
    full[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BandId, SourceRequest};

    #[test]
    fn writes_named_by_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trace = TraceWriter::new(dir.path().join("_trace"), true).expect("trace");
        let req = SourceRequest::new("明日送って/ください?", "ja", "en", "v1");
        let key = CacheKey::for_band(&req, &BandId::base());
        trace
            .write_call(&key, Stage::Base, "prompt", "hello")
            .expect("write");
        let path = trace
            .dir()
            .join(format!("{}.base.prompt.txt", key_digest(&key)));
        let body = std::fs::read_to_string(path).expect("read");
        assert!(body.ends_with("hello"));
        assert!(body.starts_with("# v1|ja->en|"));
    }

    #[test]
    fn disabled_writer_is_silent() {
        let trace = TraceWriter::disabled();
        let req = SourceRequest::new("x", "ja", "en", "v1");
        let key = CacheKey::for_band(&req, &BandId::base());
        trace
            .write_call(&key, Stage::Verify, "response", "ignored")
            .expect("noop");
    }
}
