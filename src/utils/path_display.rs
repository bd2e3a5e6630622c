//! 터미널 표시용 경로/이름 축약 (유니코드 표시 너비 기준)

use std::path::Path;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: &str = "...";

/// 가운데를 `...`으로 줄여 `max_width` 안에 맞춤
pub fn fit_width(text: &str, max_width: usize) -> String {
    if text.width() <= max_width {
        return text.to_string();
    }
    if max_width <= ELLIPSIS.len() + 1 {
        return prefix_within(text, max_width).to_string();
    }

    let budget = max_width - ELLIPSIS.len();
    let head = prefix_within(text, budget - budget / 2);
    let tail = suffix_within(text, budget / 2);
    format!("{}{}{}", head, ELLIPSIS, tail)
}

/// 홈 디렉토리를 `~`로 바꾼 표시용 경로
pub fn display_path(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            if rest.as_os_str().is_empty() {
                return "~".to_string();
            }
            return format!("~/{}", rest.display());
        }
    }
    path.display().to_string()
}

/// 압축 파일 내부 경로에서 마지막 구성 요소만 남기고 `max_width`에 맞춤
///
/// 진행 메시지처럼 공간이 좁은 곳에서 사용
pub fn fit_archive_name(full_path: &str, max_width: usize) -> String {
    let trimmed = full_path.trim_end_matches('/');
    let leaf = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if trimmed.width() <= max_width {
        return trimmed.to_string();
    }
    fit_width(leaf, max_width)
}

fn prefix_within(text: &str, max_width: usize) -> &str {
    let mut width = 0;
    for (index, ch) in text.char_indices() {
        width += ch.width().unwrap_or(1);
        if width > max_width {
            return &text[..index];
        }
    }
    text
}

fn suffix_within(text: &str, max_width: usize) -> &str {
    let mut width = 0;
    for (index, ch) in text.char_indices().rev() {
        width += ch.width().unwrap_or(1);
        if width > max_width {
            return &text[index + ch.len_utf8()..];
        }
    }
    text
}
