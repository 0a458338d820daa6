//! `Element`: an immutable key/value pair, ordered by key only.

/// The sentinel used to mark a vacated slot in a node's on-disk arrays.
/// Not a reserved key at the API level: callers may legally insert a key
/// of `-1` (see design note in DESIGN.md on this ambiguity).
pub const SENTINEL: Element = Element { key: -1, data: -1 };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Element {
    pub key: i32,
    pub data: i32,
}

impl Element {
    pub fn new(key: i32, data: i32) -> Self {
        Element { key, data }
    }

    pub fn is_sentinel(&self) -> bool {
        *self == SENTINEL
    }
}

// Ordering is by key only; `data` is opaque payload. Deriving `Ord` would
// order by `(key, data)` lexicographically, which is wrong, so it is
// implemented explicitly here instead.
impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}
