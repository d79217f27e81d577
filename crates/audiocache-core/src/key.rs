//! Cache key derivation.
//!
//! A key is `{hash}.{ext}`: a base-36 rolling hash of the source URL plus the
//! URL's file extension. The same URL always yields the same key, across runs
//! and platforms. Collisions are possible (32-bit hash) and tolerated.

use std::fmt;

/// Extension used when the URL carries no usable one.
pub const DEFAULT_EXTENSION: &str = "mp3";

/// Prefix of every cached file name.
pub const FILE_PREFIX: &str = "audio_cache_";

const MAX_EXTENSION_LEN: usize = 8;

/// Stable identifier for a cached source URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `url`.
    pub fn derive(url: &str) -> Self {
        let hash = to_base36(rolling_hash(url));
        let extension = file_extension(url).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        Self(format!("{}.{}", hash, extension))
    }

    /// The key as used in the index and in sync manifests.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the backing file inside the cache directory.
    pub fn file_name(&self) -> String {
        file_name_for(&self.0)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// File name of the backing file for an already derived key string.
pub fn file_name_for(key: &str) -> String {
    format!("{}{}", FILE_PREFIX, key)
}

/// `h = h * 31 + unit` over UTF-16 code units with 32-bit wrapping, then the
/// absolute value.
fn rolling_hash(input: &str) -> u32 {
    input
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit))
        })
        .unsigned_abs()
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::with_capacity(7);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Extension of the last path segment, ignoring query and fragment.
///
/// Returns `None` unless the extension is 1-8 ASCII alphanumerics.
fn file_extension(url: &str) -> Option<String> {
    let without_query = url.split(|c| c == '?' || c == '#').next().unwrap_or("");

    // Skip "scheme://authority" so a bare host never looks like a file name.
    let path = match without_query.find("://") {
        Some(idx) => {
            let rest = &without_query[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "",
            }
        }
        None => without_query,
    };

    let segment = path.rsplit('/').next().unwrap_or("");
    let (_, ext) = segment.rsplit_once('.')?;

    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}
