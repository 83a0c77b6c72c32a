//! Path normalization for rule matching
//!
//! Changes carry their location as a list of segments. Rules address fields
//! with a dotted string where list elements are written as `*`. Two locations
//! refer to the same rule target iff their normalized forms are equal.

/// Wildcard written in place of a list index
pub const WILDCARD: &str = "*";

/// Join segments into `.a.b.c`, replacing index segments with `*`.
///
/// Only whole segments made of ASCII digits are replaced; there is no partial
/// or bracket wildcard syntax.
pub fn normalize<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for segment in segments {
        let segment = segment.as_ref();
        out.push('.');
        if is_index(segment) {
            out.push_str(WILDCARD);
        } else {
            out.push_str(segment);
        }
    }
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Normalize a dotted path such as `spec.nodePools.2.size`.
///
/// A leading dot is optional; empty segments are ignored.
pub fn normalize_dotted(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    normalize(&segments)
}

/// Whether two dotted paths address the same rule target
pub fn same_target(a: &str, b: &str) -> bool {
    normalize_dotted(a) == normalize_dotted(b)
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
