//! A `__`-joined column path, built without repeated string concatenation
//! (spec.md §9, design note 1). Representation grounded on
//! `doc::ptr::Pointer`'s small-vec-backed byte tape, generalized from JSON
//! Pointer tokens to denester path segments.

use tinyvec::TinyVec;

pub const SEPARATOR: &str = "__";

/// A path of column-name segments, rendered with [`SEPARATOR`] between
/// them. Stored as a flat byte tape with segment boundaries recorded
/// separately, so descending into a child only needs to append bytes
/// rather than rebuild a `Vec<String>`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Path {
    bytes: TinyVec<[u8; 32]>,
    // Byte offset (within `bytes`) where each segment begins.
    bounds: TinyVec<[usize; 8]>,
}

impl Path {
    /// An empty path: renders as `""`, appending its first segment with no
    /// leading separator. Used to accumulate a column path from scratch at
    /// the root of a table (root or subtable) without seeding it with the
    /// table's own name — the table name only ever goes into a subtable's
    /// *name*, never into a column path (spec.md §4.2, §9).
    pub fn new() -> Path {
        Path {
            bytes: TinyVec::new(),
            bounds: TinyVec::new(),
        }
    }

    pub fn root(name: &str) -> Path {
        let mut p = Path::new();
        p.push(name);
        p
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn push(&mut self, segment: &str) {
        self.bounds.push(self.bytes.len());
        self.bytes.extend_from_slice(segment.as_bytes());
    }

    /// Returns a new `Path` with `segment` appended, leaving `self` intact.
    pub fn child(&self, segment: &str) -> Path {
        let mut next = self.clone();
        next.push(segment);
        next
    }

    pub fn last(&self) -> &str {
        let start = *self.bounds.last().unwrap_or(&0);
        std::str::from_utf8(&self.bytes[start..]).unwrap()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        let bytes = &self.bytes;
        let mut bounds = self.bounds.iter().copied().peekable();
        std::iter::from_fn(move || {
            let start = bounds.next()?;
            let end = bounds.peek().copied().unwrap_or(bytes.len());
            Some(std::str::from_utf8(&bytes[start..end]).unwrap())
        })
    }

    pub fn rendered(&self) -> String {
        self.segments().collect::<Vec<_>>().join(SEPARATOR)
    }
}

impl Default for Path {
    fn default() -> Path {
        Path::new()
    }
}

impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Path({:?})", self.rendered())
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.rendered())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_renders_with_double_underscore() {
        let root = Path::root("users");
        let child = root.child("address").child("zip");
        assert_eq!(child.rendered(), "users__address__zip");
        // the parent path is untouched by `child`
        assert_eq!(root.rendered(), "users");
    }

    #[test]
    fn path_last_segment() {
        let p = Path::root("users").child("tags");
        assert_eq!(p.last(), "tags");
    }
}
