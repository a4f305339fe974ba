//! A1-notation helpers for addressing spreadsheet cells.

/// Convert a 1-based column number to its letters (1 → A, 27 → AA).
///
/// Bijective base-26: there is no zero digit, so `Z` is 26 and `AA` follows it.
/// Column 0 has no letters and yields an empty string.
pub fn column_letter(column: usize) -> String {
    let mut n = column;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert column letters back to a 1-based column number.
pub fn column_number(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0usize, |acc, c| {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        Some(acc * 26 + (c as usize - 'A' as usize + 1))
    })
}

/// Range covering `row_count` rows of `column_count` columns from `start_row`.
///
/// Returns `None` for an empty block.
pub fn block_range(start_row: usize, row_count: usize, column_count: usize) -> Option<String> {
    if row_count == 0 || column_count == 0 {
        return None;
    }
    let end_row = start_row + row_count - 1;
    Some(format!(
        "A{}:{}{}",
        start_row,
        column_letter(column_count),
        end_row
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
    }

    #[test]
    fn test_double_letters() {
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(53), "BA");
        assert_eq!(column_letter(702), "ZZ");
        assert_eq!(column_letter(703), "AAA");
    }

    #[test]
    fn test_zero_column() {
        assert_eq!(column_letter(0), "");
        assert_eq!(column_number(""), None);
    }

    #[test]
    fn test_column_number_rejects_digits() {
        assert_eq!(column_number("A1"), None);
    }

    #[test]
    fn test_block_range() {
        assert_eq!(block_range(2, 3, 4).as_deref(), Some("A2:D4"));
        assert_eq!(block_range(1, 1, 28).as_deref(), Some("A1:AB1"));
        assert_eq!(block_range(2, 0, 4), None);
    }

    proptest! {
        #[test]
        fn column_letters_invert(column in 1usize..100_000) {
            let letters = column_letter(column);
            prop_assert!(letters.chars().all(|c| c.is_ascii_uppercase()));
            prop_assert_eq!(column_number(&letters), Some(column));
        }
    }
}
