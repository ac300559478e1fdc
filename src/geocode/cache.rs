use crate::domain::{GeocodeStatus, GeocodedAddress};
use crate::error::Result;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Durable store for geocoding results, keyed by normalized address.
///
/// Injectable so the batch resolver can run against an in-memory fake in
/// tests instead of touching disk.
pub trait GeocodeRepository: Send {
    fn get(&self, normalized_address: &str) -> Option<&GeocodedAddress>;
    fn put(&mut self, entry: GeocodedAddress) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn resolved_count(&self) -> usize;
    /// Owned copy of every entry, for feature and merge stages that walk
    /// the whole cache.
    fn snapshot(&self) -> Vec<GeocodedAddress>;
}

/// File-backed repository: one NDJSON row per address, rewritten through a
/// temp file and rename on every put so an interruption mid-batch loses at
/// most the in-flight address.
pub struct FileGeocodeRepository {
    path: PathBuf,
    entries: BTreeMap<String, GeocodedAddress>,
}

impl FileGeocodeRepository {
    pub fn open(path: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        if path.exists() {
            let file = fs::File::open(path)?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<GeocodedAddress>(&line) {
                    Ok(entry) => {
                        entries.insert(entry.normalized_address.clone(), entry);
                    }
                    Err(e) => {
                        // A torn final line can remain after a crash; skip it
                        // rather than refusing to load the rest of the cache.
                        warn!(line = line_no + 1, error = %e, "skipping unreadable cache line");
                    }
                }
            }
        }
        Ok(Self { path: path.to_path_buf(), entries })
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut buf = String::new();
        for entry in self.entries.values() {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, buf.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl GeocodeRepository for FileGeocodeRepository {
    fn get(&self, normalized_address: &str) -> Option<&GeocodedAddress> {
        self.entries.get(normalized_address)
    }

    fn put(&mut self, entry: GeocodedAddress) -> Result<()> {
        self.entries.insert(entry.normalized_address.clone(), entry);
        self.persist()
    }

    fn flush(&mut self) -> Result<()> {
        self.persist()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn resolved_count(&self) -> usize {
        self.entries.values().filter(|e| e.status == GeocodeStatus::Resolved).count()
    }

    fn snapshot(&self) -> Vec<GeocodedAddress> {
        self.entries.values().cloned().collect()
    }
}

/// In-memory repository for tests and dry runs.
#[derive(Default)]
pub struct InMemoryGeocodeRepository {
    entries: BTreeMap<String, GeocodedAddress>,
    pub put_count: usize,
}

impl InMemoryGeocodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GeocodeRepository for InMemoryGeocodeRepository {
    fn get(&self, normalized_address: &str) -> Option<&GeocodedAddress> {
        self.entries.get(normalized_address)
    }

    fn put(&mut self, entry: GeocodedAddress) -> Result<()> {
        self.put_count += 1;
        self.entries.insert(entry.normalized_address.clone(), entry);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn resolved_count(&self) -> usize {
        self.entries.values().filter(|e| e.status == GeocodeStatus::Resolved).count()
    }

    fn snapshot(&self) -> Vec<GeocodedAddress> {
        self.entries.values().cloned().collect()
    }
}
