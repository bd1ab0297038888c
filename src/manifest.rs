use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::{batch::Item, consts::*, error::ConfigError};

/// Read a BAM manifest and return its items sorted by name.
///
/// The manifest is a tab-separated file with one BAM per line:
///
/// ``` text
/// name    size_bytes    experimental_strategy
/// a.bam   268435456000  WGS
/// ```
///
/// A header line starting with `name` and lines starting with `#` are skipped.
/// Sizes are converted from bytes to gigabytes.
///
/// # Example
///
/// ``` rust, ignore
/// let items = read_manifest(Path::new("bams.tsv")).unwrap();
/// ```
pub fn read_manifest(path: &Path) -> Result<Vec<Item>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Missing {
        path: path.to_path_buf(),
        source,
    })?;

    if path.extension().and_then(|ext| ext.to_str()) != Some(TSV) {
        log::warn!(
            "WARN: manifest {} does not have a .{} extension, parsing as TSV anyway",
            path.display(),
            TSV
        );
    }

    let mut items = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| ConfigError::Missing {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(item) = parse_line(&line, idx + 1)? {
            items.push(item);
        }
    }

    items.sort_by(|a, b| a.id.cmp(&b.id));
    log::info!(
        "INFO [MANIFEST]: {} BAM files read from {}",
        items.len(),
        path.display()
    );

    Ok(items)
}

fn parse_line(line: &str, lineno: usize) -> Result<Option<Item>, ConfigError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("name\t") {
        return Ok(None);
    }

    let fields = line.split('\t').map(str::trim).collect::<Vec<_>>();
    let [name, size, strategy] = fields[..] else {
        return Err(ConfigError::Manifest {
            line: lineno,
            reason: format!("expected 3 tab-separated fields, found {}", fields.len()),
        });
    };

    if !name.ends_with(&format!(".{}", BAM)) {
        log::warn!("WARN: {} does not look like a BAM file", name);
    }

    let bytes = size.parse::<u64>().map_err(|e| ConfigError::Manifest {
        line: lineno,
        reason: format!("invalid size '{}': {}", size, e),
    })?;

    Ok(Some(Item::new(
        name,
        bytes as f64 / BYTES_PER_GB,
        strategy,
    )))
}
