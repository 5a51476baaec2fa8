//! Directory payload grammar (spec.md §6): `DIR ::= (N ":" I "/")*`,
//! `N = [^:/]+`, `I = [0-9]+`. A directory's extent content is this
//! flat text, not a binary record -- chosen by the original design for
//! human-readability (exercised read-only by `chfs_mkfs ls`).

/// Parses a directory payload into an ordered list of `(name, inum)`
/// pairs, preserving on-disk order. Malformed trailing text (no
/// matching `':'`/digits/`'/'`) is dropped rather than treated as
/// fatal, matching spec.md §7's "replay is best-effort" posture for
/// anything read back off disk.
#[must_use]
pub fn parse(payload: &[u8]) -> Vec<(String, u64)> {
    let text = String::from_utf8_lossy(payload);
    text.split('/')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (name, inum) = entry.rsplit_once(':')?;
            Some((name.to_string(), inum.parse().ok()?))
        })
        .collect()
}

/// Rejects names that would corrupt the flat encoding (spec.md §9
/// "Directory name restrictions" -- reject, rather than switch to a
/// length-prefixed format).
pub fn validate_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(':') && !name.contains('/')
}

/// Appends a `"name:inum/"` entry to `payload`.
pub fn append_entry(payload: &mut Vec<u8>, name: &str, inum: u64) {
    payload.extend_from_slice(name.as_bytes());
    payload.push(b':');
    payload.extend_from_slice(inum.to_string().as_bytes());
    payload.push(b'/');
}

/// Removes the `"name:<inum>/"` substring for `name`, if present.
/// Returns `None` if `name` has no entry in `payload`.
#[must_use]
pub fn remove_entry(payload: &[u8], name: &str) -> Option<Vec<u8>> {
    let text = String::from_utf8_lossy(payload);
    let needle = format!("{name}:");
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find(needle.as_str()) {
        let abs = search_from + rel;
        let at_boundary = abs == 0 || text.as_bytes()[abs - 1] == b'/';
        if at_boundary {
            let end = abs + text[abs..].find('/')? + 1;
            let mut out = text[..abs].as_bytes().to_vec();
            out.extend_from_slice(text[end..].as_bytes());
            return Some(out);
        }
        search_from = abs + needle.len();
    }
    None
}
