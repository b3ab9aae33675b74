//! Interval gap computation over a section's fragments.
//!
//! Coverage sorts every fragment of a section by offset and sweeps a cursor
//! across `[0, total_length)`, emitting one gap fragment for each byte range
//! no fragment accounts for. Fragments starting behind the cursor are
//! double-covered (a comment inside an object, whitespace attributed to the
//! preceding token) and leave the cursor untouched.

use crate::error::{Error, Result};
use crate::model::{Fragment, Section, Segment, UNCOVERED_KEY};
use tracing::{trace, warn};

/// Computes the uncovered segment for a section
///
/// Fails with [`Error::UndefinedCoverage`] when the section length was never
/// set or is zero.
pub fn for_section(section: &Section) -> Result<Segment> {
    let spans: Vec<(usize, usize)> = section
        .fragments()
        .map(|f| (f.offset, f.length))
        .collect();
    uncovered(&spans, section.length())
}

/// Computes the gaps left by `(offset, length)` spans within `total_length`
pub fn uncovered(spans: &[(usize, usize)], total_length: Option<usize>) -> Result<Segment> {
    let total = match total_length {
        Some(total) if total > 0 => total,
        other => return Err(Error::UndefinedCoverage { length: other }),
    };

    let mut segment = Segment::new(UNCOVERED_KEY);
    if spans.is_empty() {
        segment.push(Fragment::new(0, total));
        return Ok(segment);
    }

    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|&(offset, _)| offset);

    let mut cursor = 0usize;
    for (offset, length) in sorted {
        if offset >= total {
            // belongs to a section queued separately
            break;
        }
        if offset == cursor {
            cursor += length;
        } else if offset > cursor {
            segment.push(Fragment::spanning(cursor, offset));
            cursor = offset + length;
        } else if offset + length > cursor {
            warn!(
                "fragment {}..{} partially overlaps covered range ending at {}",
                offset,
                offset + length,
                cursor
            );
        } else {
            trace!("double-covered fragment {}..{}", offset, offset + length);
        }
    }

    if cursor < total {
        segment.push(Fragment::spanning(cursor, total));
    }

    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gaps(spans: &[(usize, usize)], total: usize) -> Vec<(usize, usize)> {
        uncovered(spans, Some(total))
            .unwrap()
            .fragments()
            .iter()
            .map(|f| (f.offset, f.length))
            .collect()
    }

    #[test]
    fn test_trailing_gap() {
        assert_eq!(gaps(&[(0, 3), (3, 2)], 10), vec![(5, 5)]);
    }

    #[test]
    fn test_empty_fragments() {
        assert_eq!(gaps(&[], 10), vec![(0, 10)]);
    }

    #[test]
    fn test_nested_fragment_ignored() {
        assert_eq!(gaps(&[(0, 10), (4, 2)], 10), Vec::<(usize, usize)>::new());
        assert_eq!(gaps(&[(0, 6), (4, 2), (8, 1)], 10), vec![(6, 2), (9, 1)]);
    }

    #[test]
    fn test_unsorted_input_and_leading_gap() {
        assert_eq!(gaps(&[(7, 3), (2, 3)], 10), vec![(0, 2), (5, 2)]);
    }

    #[test]
    fn test_fragment_beyond_length_ignored() {
        assert_eq!(gaps(&[(0, 4), (12, 8)], 10), vec![(4, 6)]);
    }

    #[test]
    fn test_tiling() {
        let spans = [(1, 2), (5, 1), (6, 2), (11, 4)];
        let total = 16;
        let mut covered = vec![false; total];
        for &(offset, length) in spans.iter().chain(gaps(&spans, total).iter()) {
            for byte in &mut covered[offset..offset + length] {
                assert!(!*byte, "byte covered twice");
                *byte = true;
            }
        }
        assert!(covered.iter().all(|&b| b));
    }

    #[test]
    fn test_undefined_length() {
        assert!(matches!(
            uncovered(&[], None),
            Err(Error::UndefinedCoverage { length: None })
        ));
        assert!(matches!(
            uncovered(&[(0, 1)], Some(0)),
            Err(Error::UndefinedCoverage { length: Some(0) })
        ));
    }

    #[test]
    fn test_for_section() {
        let mut section = Section::new(0, "application/pdf", 0);
        let mut segment = Segment::new("header");
        segment.push(Fragment::new(0, 9));
        section.add_segment(segment);
        section.set_length(12);

        let uncovered = for_section(&section).unwrap();
        assert_eq!(uncovered.key(), UNCOVERED_KEY);
        assert_eq!(uncovered.fragments(), &[Fragment::new(9, 3)]);
    }
}
