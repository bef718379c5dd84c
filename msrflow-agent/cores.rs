//! Core-set parsing.
//!
//! A core set is given as comma-separated items, each a single id or an
//! inclusive range: `"0"`, `"0,2"`, `"0-3"`, `"0-3,6"`. Ranges may be given
//! in either direction (`"5-2"` selects 2 through 5). Ids at or past the
//! core count are rejected. The literal `all` is handled by the caller, not
//! here.

use crate::error::SyntaxError;

/// Parse one core-set string, marking the selected ids in `selected`, whose
/// length is the core count of the host. Previously marked ids stay marked,
/// so repeated option occurrences accumulate as a union.
///
/// On failure, returns the byte offset of the offending id or separator.
pub fn parse_cores(selected: &mut [bool], input: &str) -> Result<(), SyntaxError> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut range_start: Option<usize> = None;

    loop {
        let digits_at = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_at {
            return Err(SyntaxError { offset: digits_at });
        }

        let id: usize = input[digits_at..pos]
            .parse()
            .map_err(|_| SyntaxError { offset: digits_at })?;
        if id >= selected.len() {
            return Err(SyntaxError { offset: digits_at });
        }

        let sep = bytes.get(pos).copied();

        if let Some(start) = range_start.take() {
            let (lo, hi) = if start <= id { (start, id) } else { (id, start) };
            for slot in &mut selected[lo..=hi] {
                *slot = true;
            }
        } else if sep != Some(b'-') {
            selected[id] = true;
        }

        match sep {
            None => return Ok(()),
            Some(b',') => pos += 1,
            Some(b'-') => {
                range_start = Some(id);
                pos += 1;
            }
            Some(_) => return Err(SyntaxError { offset: pos }),
        }
    }
}
