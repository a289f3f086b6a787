//! 長い文字列の切り詰め

/// スナップショットに含める文字列の最大長（文字数）
pub const MAX_VALUE_LENGTH: usize = 2048;

/// 切り詰めた文字列の末尾に付ける印
pub const TRUNCATION_SUFFIX: &str = " <truncated>";

/// 文字列を最大 `max_length` 文字に切り詰める
///
/// 長さが `max_length` 以下ならそのまま返し、超える場合は先頭 `max_length` 文字に
/// `" <truncated>"` を付けて返します。
///
/// # Examples
/// ```
/// use relay_vars::truncate;
///
/// assert_eq!(truncate(5, "abc"), "abc");
/// assert_eq!(truncate(2, "abc"), "ab <truncated>");
/// ```
pub fn truncate(max_length: usize, s: &str) -> String {
    match s.char_indices().nth(max_length) {
        Some((end, _)) => format!("{}{}", &s[..end], TRUNCATION_SUFFIX),
        None => s.to_string(),
    }
}
