// Object naming helpers

use crate::store::validate_key;
use crate::Result;

/// Splits a key into stem and extension, keeping the leading dot on the
/// extension. Keys without an extension get an empty one.
pub fn split_extension(key: &str) -> (&str, &str) {
    match key.rfind('.') {
        Some(dot) if dot > 0 => key.split_at(dot),
        _ => (key, ""),
    }
}

/// Name of the `index`th chunk of `source`, e.g. `input-2.bin`
pub fn chunk_name(source: &str, index: usize) -> String {
    let (stem, ext) = split_extension(source);
    format!("{stem}-{index}{ext}")
}

pub fn chunk_names(source: &str, count: usize) -> Vec<String> {
    (0..count).map(|index| chunk_name(source, index)).collect()
}

/// Final name of a chunk after it has been moved.
pub fn moved_name(prefix: &str, key: &str) -> Result<String> {
    let name = format!("{prefix}{key}");
    validate_key(&name)?;
    Ok(name)
}
