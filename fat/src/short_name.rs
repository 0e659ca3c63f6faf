// Deterministic 8.3 short name generation with ~N collision suffixes.
// The contract is determinism and uniqueness within the used set, not
// bug-for-bug parity with any particular operating system.

use fatforge_core::ForgeError;

/// Derive a fresh 8.3 name for `long_name`, avoiding every name in
/// `used` (case-insensitively).
pub fn generate_short_name(long_name: &str, used: &[String]) -> Result<String, ForgeError> {
    let trimmed = long_name.trim_start_matches('.').to_uppercase();

    let (raw_name, raw_ext) = match trimmed.rfind('.') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => (trimmed.as_str(), ""),
    };

    let ext = clean_short_string(raw_ext);
    let ext = ext[..ext.len().min(3)].to_string();
    let name = clean_short_string(raw_name);
    let simple = join_simple(&name, &ext);

    let needs_suffix = name != raw_name
        || name.len() > 8
        || used.iter().any(|u| u.to_uppercase() == simple);
    if !needs_suffix {
        return Ok(simple);
    }

    for i in 1..99999u32 {
        let suffix = format!("~{}", i);
        let stem_len = (8 - suffix.len()).min(name.len());
        let candidate = join_simple(&format!("{}{}", &name[..stem_len], suffix), &ext);

        if !used.iter().any(|u| u.to_uppercase() == candidate) {
            return Ok(candidate);
        }
    }

    Err(ForgeError::NameExhausted(long_name.to_string()))
}

fn join_simple(name: &str, ext: &str) -> String {
    if ext.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", name, ext)
    }
}

/// Drop dots and spaces, keep the characters valid in a short name and
/// replace everything else with an underscore. Output is pure ASCII, so
/// byte indexing into it is safe.
fn clean_short_string(v: &str) -> String {
    let mut result = String::with_capacity(v.len());
    for c in v.chars() {
        if c == '.' || c == ' ' {
            continue;
        }
        result.push(if valid_short_char(c) { c } else { '_' });
    }
    result
}

fn valid_short_char(c: char) -> bool {
    matches!(c,
        'A'..='Z'
        | '0'..='9'
        | '_' | '^' | '$' | '~' | '!' | '#' | '%' | '&' | '-'
        | '{' | '}' | '(' | ')' | '@' | '\'' | '`')
}
