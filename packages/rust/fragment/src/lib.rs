//! Pure span algebra over `(offset, length)` byte fragments.
//!
//! A [`Fragment`] is a half-open byte span `[offset, offset + length)` into a
//! text buffer it does not carry — every operation that needs the buffer
//! takes it as an explicit argument. All offsets are byte offsets; use
//! [`Fragment::align_to_char_boundaries`] before any human-facing rendering.
//!
//! No I/O, no concurrency: everything here is a pure function, which is what
//! makes the keyword-context merging in the fragmentizer testable in
//! isolation.

/// A span whose end runs past the supplied text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fragment [{offset}, +{length}) is out of range for text of {text_len} bytes")]
pub struct OutOfRange {
    pub offset: usize,
    pub length: usize,
    pub text_len: usize,
}

/// A half-open byte span `[offset, offset + length)` into some text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Byte offset from the beginning of the text.
    pub offset: usize,
    /// Length of the span in bytes.
    pub length: usize,
}

impl Fragment {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end of the span.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Cut this span out of `text`.
    ///
    /// Fails if the span runs past the end of `text` or cuts a UTF-8
    /// character in half.
    pub fn apply<'a>(&self, text: &'a str) -> Result<&'a str, OutOfRange> {
        text.get(self.offset..self.end()).ok_or(OutOfRange {
            offset: self.offset,
            length: self.length,
            text_len: text.len(),
        })
    }

    /// Smallest span covering both `a` and `b`. Gaps between them are
    /// silently included.
    pub fn union(a: &Fragment, b: &Fragment) -> Fragment {
        let offset = a.offset.min(b.offset);
        let end = a.end().max(b.end());
        Fragment::new(offset, end - offset)
    }

    /// Nudge the span onto UTF-8 character boundaries.
    ///
    /// A start byte inside a multi-byte character moves outward (grow left);
    /// an end byte inside one grows right while there is room, otherwise
    /// shrinks. Idempotent, and a no-op for spans already on boundaries.
    pub fn align_to_char_boundaries(&mut self, text: &str) {
        let len = text.len();
        self.offset = self.offset.min(len);
        let mut end = self.end().min(len);

        while !text.is_char_boundary(self.offset) {
            // offset 0 is always a boundary, so growing left terminates
            self.offset -= 1;
        }

        while !text.is_char_boundary(end) {
            if end < len {
                end += 1;
            } else {
                end -= 1;
            }
        }

        self.length = end - self.offset;
    }
}

/// Find every occurrence of `keyword` in `text` as spans, including
/// overlapping ones. Literal, case-sensitive byte search.
pub fn find_keyword(text: &str, keyword: &str) -> Vec<Fragment> {
    let haystack = text.as_bytes();
    let needle = keyword.as_bytes();
    let mut fragments = Vec::new();

    if needle.is_empty() || needle.len() > haystack.len() {
        return fragments;
    }

    let mut offset = 0;
    while offset + needle.len() <= haystack.len() {
        match haystack[offset..]
            .windows(needle.len())
            .position(|w| w == needle)
        {
            Some(found) => {
                let start = offset + found;
                fragments.push(Fragment::new(start, needle.len()));
                offset = start + 1;
            }
            None => break,
        }
    }

    fragments
}

/// Stable merge of two offset-ascending span lists into one.
///
/// On equal offsets the element from `a` comes first.
pub fn merge(a: &[Fragment], b: &[Fragment]) -> Vec<Fragment> {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].offset <= b[j].offset {
            merged.push(a[i]);
            i += 1;
        } else {
            merged.push(b[j]);
            j += 1;
        }
    }

    merged.extend_from_slice(&a[i..]);
    merged.extend_from_slice(&b[j..]);
    merged
}

/// Merge any number of offset-ascending span lists by repeated pairwise
/// [`merge`].
pub fn merge_sorted(lists: &[Vec<Fragment>]) -> Vec<Fragment> {
    match lists {
        [] => Vec::new(),
        [single] => single.clone(),
        [first, rest @ ..] => {
            let mut merged = first.clone();
            for list in rest {
                merged = merge(&merged, list);
            }
            merged
        }
    }
}

/// Greedily union adjacent spans while the union stays within `max_len`.
///
/// Whenever the next union would exceed the cap, the accumulator is flushed
/// and a new one starts at the next span, trimmed to begin where the flushed
/// window ends so no byte is covered twice. Input must be offset-ascending;
/// the output is the minimal set of pairwise non-overlapping merged windows
/// under the length ceiling.
pub fn join(fragments: &[Fragment], max_len: usize) -> Vec<Fragment> {
    if fragments.len() < 2 {
        return fragments.to_vec();
    }

    let mut joined = Vec::with_capacity(fragments.len());
    let mut current = fragments[0];

    for frag in &fragments[1..] {
        let union = Fragment::union(&current, frag);
        if union.length <= max_len {
            current = union;
        } else {
            joined.push(current);
            // A capped flush can leave the successor overlapping the
            // flushed window; keep only the part past its end.
            let offset = frag.offset.max(current.end());
            current = Fragment::new(offset, frag.end().saturating_sub(offset));
        }
    }
    joined.push(current);
    joined
}

/// Widen `span` to a window of `desired_len` bytes centered on its midpoint.
///
/// Budget that would run off either end of `text` is redistributed to the
/// opposite side, then the window is clamped to `[0, text.len())` and
/// aligned to character boundaries. For text longer than `desired_len` the
/// resulting length equals `desired_len` (modulo alignment on multi-byte
/// text); otherwise the whole text is returned.
pub fn widen_to_context(text: &str, desired_len: usize, span: &Fragment) -> Fragment {
    let len = text.len();
    if desired_len >= len {
        return Fragment::new(0, len);
    }

    let mid = (span.offset + span.end()) / 2;
    let half = desired_len / 2;

    let mut start = mid as i64 - half as i64;
    let mut end = start + desired_len as i64;

    if start < 0 {
        end -= start;
        start = 0;
    }
    if end > len as i64 {
        start -= end - len as i64;
        end = len as i64;
        if start < 0 {
            start = 0;
        }
    }

    let mut context = Fragment::new(start as usize, (end - start) as usize);
    context.align_to_char_boundaries(text);
    context
}

/// For each context span, collect the indices of keyword spans fully
/// contained in it.
///
/// Both inputs must be offset-ascending and the contexts pairwise
/// non-overlapping (the shape [`join`] produces). A single keyword cursor
/// advances monotonically, so the scan is O(n + m); a keyword extending past
/// a context's end terminates that context's collection.
pub fn keywords_in_contexts(keywords: &[Fragment], contexts: &[Fragment]) -> Vec<Vec<usize>> {
    let mut result = vec![Vec::new(); contexts.len()];
    let mut cursor = 0;

    for (ctx_id, ctx) in contexts.iter().enumerate() {
        while cursor < keywords.len() && keywords[cursor].offset < ctx.offset {
            cursor += 1;
        }

        let mut kw_id = cursor;
        while kw_id < keywords.len() && keywords[kw_id].end() <= ctx.end() {
            result[ctx_id].push(kw_id);
            kw_id += 1;
        }
        cursor = kw_id;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_cuts_span() {
        let frag = Fragment::new(7, 5);
        assert_eq!(frag.apply("secret token here").unwrap(), "token");
    }

    #[test]
    fn apply_out_of_range() {
        let frag = Fragment::new(10, 20);
        let err = frag.apply("short").unwrap_err();
        assert_eq!(err.text_len, 5);
    }

    #[test]
    fn union_covers_both() {
        let a = Fragment::new(0, 10);
        let b = Fragment::new(3, 15);
        let u = Fragment::union(&a, &b);
        assert_eq!(u, Fragment::new(0, 18));
    }

    #[test]
    fn union_is_idempotent_on_self() {
        let a = Fragment::new(4, 10);
        assert_eq!(Fragment::union(&a, &a), a);
    }

    #[test]
    fn union_of_adjacent_spans() {
        let a = Fragment::new(0, 5);
        let b = Fragment::new(5, 5);
        assert_eq!(Fragment::union(&a, &b), Fragment::new(0, 10));
    }

    #[test]
    fn union_bounds_property() {
        let cases = [
            (Fragment::new(0, 3), Fragment::new(10, 2)),
            (Fragment::new(5, 5), Fragment::new(2, 1)),
            (Fragment::new(7, 0), Fragment::new(7, 9)),
        ];
        for (a, b) in cases {
            let u = Fragment::union(&a, &b);
            assert!(u.offset <= a.offset.min(b.offset));
            assert!(u.end() >= a.end().max(b.end()));
        }
    }

    #[test]
    fn align_recovers_multibyte_word() {
        let text = "Hello, мир, test";
        // "мир" spans bytes 7..13; start the span one byte into 'м'
        let mut frag = Fragment::new(8, 5);
        frag.align_to_char_boundaries(text);
        assert_eq!(frag.apply(text).unwrap(), "мир");
    }

    #[test]
    fn align_is_idempotent() {
        let text = "ключ=значение";
        let mut frag = Fragment::new(3, 7);
        frag.align_to_char_boundaries(text);
        let aligned = frag;
        frag.align_to_char_boundaries(text);
        assert_eq!(frag, aligned);
        assert!(frag.apply(text).is_ok());
    }

    #[test]
    fn align_shrinks_at_text_end() {
        let text = "ab£"; // '£' is 2 bytes: text is 4 bytes long
        let mut frag = Fragment::new(0, 3);
        frag.align_to_char_boundaries(text);
        // end byte 3 is inside '£'; room to grow right
        assert_eq!(frag.apply(text).unwrap(), "ab£");
    }

    #[test]
    fn find_keyword_all_occurrences() {
        let frags = find_keyword("test test xxx test", "test");
        assert_eq!(
            frags,
            vec![
                Fragment::new(0, 4),
                Fragment::new(5, 4),
                Fragment::new(14, 4)
            ]
        );
    }

    #[test]
    fn find_keyword_overlapping() {
        let frags = find_keyword("abababab", "abab");
        assert_eq!(
            frags,
            vec![
                Fragment::new(0, 4),
                Fragment::new(2, 4),
                Fragment::new(4, 4)
            ]
        );
    }

    #[test]
    fn find_keyword_absent_or_empty() {
        assert!(find_keyword("nothing here", "token").is_empty());
        assert!(find_keyword("nothing here", "").is_empty());
        assert!(find_keyword("ab", "abc").is_empty());
    }

    #[test]
    fn merge_two_sorted_lists() {
        let a = vec![Fragment::new(0, 10), Fragment::new(5, 10)];
        let b = vec![Fragment::new(2, 10), Fragment::new(7, 10)];
        assert_eq!(
            merge(&a, &b),
            vec![
                Fragment::new(0, 10),
                Fragment::new(2, 10),
                Fragment::new(5, 10),
                Fragment::new(7, 10)
            ]
        );
    }

    #[test]
    fn merge_uneven_lists() {
        let a = vec![
            Fragment::new(0, 10),
            Fragment::new(5, 10),
            Fragment::new(12, 10),
        ];
        let b = vec![Fragment::new(2, 10), Fragment::new(7, 10)];
        assert_eq!(
            merge(&a, &b),
            vec![
                Fragment::new(0, 10),
                Fragment::new(2, 10),
                Fragment::new(5, 10),
                Fragment::new(7, 10),
                Fragment::new(12, 10)
            ]
        );
    }

    #[test]
    fn merge_sorted_many_lists() {
        let lists = vec![
            vec![Fragment::new(0, 10), Fragment::new(5, 10)],
            vec![Fragment::new(2, 10), Fragment::new(7, 10)],
            vec![Fragment::new(12, 10), Fragment::new(15, 8)],
        ];
        let merged = merge_sorted(&lists);
        let offsets: Vec<usize> = merged.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 2, 5, 7, 12, 15]);
    }

    #[test]
    fn merge_sorted_degenerate_inputs() {
        assert!(merge_sorted(&[]).is_empty());
        let single = vec![vec![Fragment::new(3, 2)]];
        assert_eq!(merge_sorted(&single), vec![Fragment::new(3, 2)]);
    }

    #[test]
    fn join_respects_cap() {
        let frags = [
            Fragment::new(0, 5),
            Fragment::new(5, 7),
            Fragment::new(12, 8),
        ];
        assert_eq!(
            join(&frags, 15),
            vec![Fragment::new(0, 12), Fragment::new(12, 8)]
        );
    }

    #[test]
    fn join_collapses_under_larger_cap() {
        let frags = [
            Fragment::new(0, 5),
            Fragment::new(5, 7),
            Fragment::new(12, 8),
        ];
        assert_eq!(join(&frags, 20), vec![Fragment::new(0, 20)]);
    }

    #[test]
    fn join_trims_overlap_left_by_a_capped_flush() {
        // the union of the pair exceeds the cap, so the second span is
        // flushed separately and loses the bytes the first already covers
        let frags = [Fragment::new(30, 8), Fragment::new(35, 8)];
        assert_eq!(
            join(&frags, 8),
            vec![Fragment::new(30, 8), Fragment::new(38, 5)]
        );
    }

    #[test]
    fn join_output_never_exceeds_cap() {
        let frags = [
            Fragment::new(0, 8),
            Fragment::new(10, 8),
            Fragment::new(30, 8),
            Fragment::new(35, 8),
        ];
        for max_len in [8, 15, 25, 50] {
            let joined = join(&frags, max_len);
            assert!(joined.iter().all(|f| f.length <= max_len));
            // pairwise non-overlapping, ascending
            for pair in joined.windows(2) {
                assert!(pair[0].end() <= pair[1].offset);
            }
        }
    }

    #[test]
    fn widen_centers_on_keyword() {
        let text = "jsadjf; sdjfsdfjk adjsfk sdafjkds fjadsfkj afjdask test jfdskalfjds dsjfkljadsf ajkdflads";
        let hits = find_keyword(text, "test");
        assert_eq!(hits.len(), 1);

        let context = widen_to_context(text, 10, &hits[0]);
        assert_eq!(context.length, 10);
        assert_eq!(context.apply(text).unwrap(), "sk test jf");
    }

    #[test]
    fn widen_redistributes_at_left_edge() {
        let text = "key WORD and a lot of trailing context after it";
        let span = Fragment::new(4, 4);
        let context = widen_to_context(text, 20, &span);
        assert_eq!(context.length, 20);
        assert_eq!(context.offset, 0);
    }

    #[test]
    fn widen_redistributes_at_right_edge() {
        let text = "a lot of leading context before the final WORD";
        let span = Fragment::new(42, 4);
        let context = widen_to_context(text, 20, &span);
        assert_eq!(context.length, 20);
        assert_eq!(context.end(), text.len());
    }

    #[test]
    fn widen_clamps_to_short_text() {
        let text = "tiny";
        let span = Fragment::new(0, 4);
        let context = widen_to_context(text, 100, &span);
        assert_eq!(context, Fragment::new(0, 4));
    }

    #[test]
    fn widen_length_property() {
        let text = "0123456789abcdefghijklmnopqrstuvwxyz";
        for offset in [0, 5, 17, 30] {
            let span = Fragment::new(offset, 3);
            let context = widen_to_context(text, 10, &span);
            assert_eq!(context.length, 10.min(text.len()));
            assert!(context.end() <= text.len());
        }
    }

    #[test]
    fn keywords_in_contexts_basic() {
        let keywords = [
            Fragment::new(2, 3),
            Fragment::new(10, 3),
            Fragment::new(25, 3),
        ];
        let contexts = [Fragment::new(0, 15), Fragment::new(20, 10)];
        let result = keywords_in_contexts(&keywords, &contexts);
        assert_eq!(result, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn keyword_equal_to_context_is_contained() {
        let keywords = [Fragment::new(5, 10)];
        let contexts = [Fragment::new(5, 10)];
        let result = keywords_in_contexts(&keywords, &contexts);
        assert_eq!(result, vec![vec![0]]);
    }

    #[test]
    fn keyword_crossing_boundary_is_excluded() {
        let keywords = [Fragment::new(8, 10)];
        let contexts = [Fragment::new(0, 15), Fragment::new(15, 15)];
        let result = keywords_in_contexts(&keywords, &contexts);
        // starts in the first context but runs past its end; starts before the second
        assert_eq!(result, vec![Vec::<usize>::new(), Vec::<usize>::new()]);
    }
}
