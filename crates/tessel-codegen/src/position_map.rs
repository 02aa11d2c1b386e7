use serde::{Deserialize, Serialize};
use tessel_syntax::Span;

/// One correspondence between a generated position and a guest position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub gen_line: u32,
    pub gen_column: u32,
    pub src_line: u32,
    pub src_column: u32,
}

/// Maps generated host text positions back to guest source positions
///
/// Entries are kept sorted by generated position. A lookup returns the entry
/// at the requested position or, failing that, the nearest one before it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionMap {
    entries: Vec<PositionEntry>,
}

impl PositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, gen_line: u32, gen_column: u32, src: Span) {
        let entry = PositionEntry {
            gen_line,
            gen_column,
            src_line: src.line,
            src_column: src.column,
        };
        let key = (gen_line, gen_column);
        match self
            .entries
            .binary_search_by_key(&key, |e| (e.gen_line, e.gen_column))
        {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    pub fn lookup(&self, gen_line: u32, gen_column: u32) -> Option<Span> {
        let key = (gen_line, gen_column);
        let idx = match self
            .entries
            .binary_search_by_key(&key, |e| (e.gen_line, e.gen_column))
        {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let e = &self.entries[idx];
        Some(Span::new(e.src_line, e.src_column))
    }

    /// Lookup that falls back to the start of the script
    pub fn translate(&self, gen_line: u32, gen_column: u32) -> Span {
        self.lookup(gen_line, gen_column).unwrap_or_default()
    }

    pub fn entries(&self) -> &[PositionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_nearest_preceding() {
        let mut map = PositionMap::new();
        map.record(3, 3, Span::new(10, 5));
        map.record(7, 3, Span::new(12, 9));

        assert_eq!(map.lookup(3, 3), Some(Span::new(10, 5)));
        assert_eq!(map.lookup(5, 1), Some(Span::new(10, 5)));
        assert_eq!(map.lookup(9, 3), Some(Span::new(12, 9)));
        assert_eq!(map.lookup(1, 1), None);
        assert_eq!(map.translate(1, 1), Span::new(1, 1));
    }

    #[test]
    fn test_out_of_order_records_stay_sorted() {
        let mut map = PositionMap::new();
        map.record(9, 3, Span::new(4, 1));
        map.record(2, 3, Span::new(1, 1));
        map.record(9, 3, Span::new(5, 1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.entries()[0].gen_line, 2);
        assert_eq!(map.lookup(9, 3), Some(Span::new(5, 1)));
    }
}
