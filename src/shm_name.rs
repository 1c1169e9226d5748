// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shm-safe object names. Cooperating processes must derive the same
// object name from the same user-visible region name, so this mapping is
// deterministic and stable.

/// FNV-1a 64-bit hash, used to shorten over-long names deterministically.
pub(crate) fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Maximum length for POSIX shm object names, including the leading '/'.
/// 0 disables truncation.
///
/// macOS rejects names longer than `PSHMNAMLEN` (31). Linux allows up to
/// NAME_MAX (255), which no reasonable region name reaches.
#[cfg(target_os = "macos")]
const NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
const NAME_MAX: usize = 0;

/// Derive the POSIX shm object name for a user-visible region name.
///
/// A leading '/' is prepended when missing. Names that exceed the platform
/// limit are shortened to `/<prefix>_<16-hex-fnv1a>`, keeping a prefix of
/// the original for debuggability.
pub fn object_name(name: &str) -> String {
    let full = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if NAME_MAX == 0 || full.len() <= NAME_MAX {
        return full;
    }

    // '/' + prefix + '_' + 16 hex digits == NAME_MAX
    const SUFFIX: usize = 1 + 16;
    let prefix_len = NAME_MAX.saturating_sub(SUFFIX + 1);

    let hash = fnv1a_64(full.as_bytes());
    let body = &full[1..];
    let mut short = String::with_capacity(NAME_MAX);
    short.push('/');
    short.push_str(&body[..prefix_len.min(body.len())]);
    short.push('_');
    short.push_str(&format!("{hash:016x}"));
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn prepends_slash() {
        assert_eq!(object_name("counter"), "/counter");
    }

    #[test]
    fn keeps_existing_slash() {
        assert_eq!(object_name("/counter"), "/counter");
    }

    #[test]
    fn deterministic_for_long_names() {
        let long = "a".repeat(200);
        assert_eq!(object_name(&long), object_name(&long));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn long_names_fit_platform_limit() {
        let long = "a".repeat(200);
        assert!(object_name(&long).len() <= 31);
    }
}
