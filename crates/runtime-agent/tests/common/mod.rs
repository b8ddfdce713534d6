// Fixtures shared by the lifecycle tests.
#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use agent_common::{AgentSettings, ConfigSnapshot};

pub const BUCKET: &str = "actions";

/// Entry point that adds parameters A and B.
pub const SUM_SCRIPT: &str = "#!/bin/sh\n\
echo \"adding $INPUT_A and $INPUT_B\"\n\
echo \"{\\\"sum\\\": $((INPUT_A + INPUT_B))}\"\n";

pub fn zip_package(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data, mode) in entries {
        let options = zip::write::SimpleFileOptions::default().unix_permissions(*mode);
        writer.start_file(*name, options).unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_gz_package(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Package whose entry point prints `script`.
pub fn script_package(script: &str) -> Vec<u8> {
    zip_package(&[("index", script, 0o755)])
}

/// A local blob store directory plus a scratch root, both temporary.
pub struct Fixture {
    pub dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("store").join(BUCKET)).unwrap();
        Self { dir }
    }

    pub fn store_root(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    pub fn scratch(&self) -> PathBuf {
        self.dir.path().join("temp")
    }

    pub fn put(&self, key: &str, bytes: &[u8]) {
        let path = self.store_root().join(BUCKET).join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    pub fn settings(&self, key: &str) -> AgentSettings {
        AgentSettings {
            action_bucket: Some(BUCKET.to_string()),
            action_file: Some(key.to_string()),
            local_store: Some(self.store_root()),
            ..Default::default()
        }
    }

    pub fn extracted(&self, relative: &str) -> PathBuf {
        self.scratch().join("extracted").join(relative)
    }
}

pub fn snapshot(entries: &[(&str, &str)]) -> ConfigSnapshot {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn list_tree(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned())
        .collect();
    files.sort();
    files
}
