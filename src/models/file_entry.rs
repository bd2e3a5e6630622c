use std::time::SystemTime;

/// 디렉토리 엔트리에 사용하는 컨텐츠 타입
pub const DIRECTORY_CONTENT_TYPE: &str = "inode/directory";

/// 압축 파일 내부 엔트리
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// 압축 파일 내부 전체 경로 (항상 `/`로 시작, 디렉토리는 `/`로 끝남)
    pub full_path: String,
    /// 외부 도구가 보고한 원래 경로 (서브프로세스 인자로 사용)
    pub original_path: String,
    /// 표시용 이름
    pub name: String,
    /// 상위 경로 (`/`로 끝남)
    pub parent_path: String,
    /// 디렉토리 여부
    pub is_directory: bool,
    /// 바이트 단위 크기 (디렉토리는 0)
    pub size: u64,
    /// 수정 시간
    pub modified: SystemTime,
    /// 암호화 여부
    pub encrypted: bool,
    /// 심볼릭 링크 대상
    pub link_target: Option<String>,
    /// MIME 타입
    pub content_type: String,
}

impl FileEntry {
    /// 도구가 출력한 경로로부터 엔트리 생성
    ///
    /// 앞쪽 `/`를 보정하고 디렉토리 여부에 맞게 뒤쪽 `/`를 정리한다.
    pub fn from_archive_path(path: &str, is_directory: bool) -> Self {
        let mut entry = Self {
            full_path: String::new(),
            original_path: path.to_string(),
            name: String::new(),
            parent_path: String::new(),
            is_directory,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            encrypted: false,
            link_target: None,
            content_type: String::new(),
        };
        entry.set_directory(is_directory);
        entry
    }

    /// 디렉토리 플래그 변경 후 파생 필드 재계산
    pub fn set_directory(&mut self, is_directory: bool) {
        self.is_directory = is_directory;
        self.full_path = normalize_full_path(&self.original_path, is_directory);

        let trimmed = self.full_path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(split) => {
                self.name = trimmed[split + 1..].to_string();
                self.parent_path = trimmed[..=split].to_string();
            }
            None => {
                self.name = String::new();
                self.parent_path = "/".to_string();
            }
        }

        self.content_type = if is_directory {
            DIRECTORY_CONTENT_TYPE.to_string()
        } else {
            mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        };
        if is_directory {
            self.size = 0;
        }
    }

    /// `dir` 아래에 있는 엔트리인지 확인 (`dir` 자체는 제외)
    pub fn is_descendant_of(&self, dir: &str) -> bool {
        let dir = normalize_full_path(dir, true);
        self.full_path != dir && self.full_path.starts_with(&dir)
    }
}

/// 압축 파일 내부 경로를 `/`로 시작하는 전체 경로로 정규화
pub fn normalize_full_path(path: &str, is_directory: bool) -> String {
    let path = path.replace('\\', "/");
    let body = path.trim_start_matches("./").trim_matches('/');
    if body.is_empty() {
        return "/".to_string();
    }
    if is_directory {
        format!("/{}/", body)
    } else {
        format!("/{}", body)
    }
}

/// 디렉토리 크기 계산 (하위 파일 크기 합산)
pub fn directory_size(entries: &[FileEntry], dir: &str) -> u64 {
    entries
        .iter()
        .filter(|e| !e.is_directory && e.is_descendant_of(dir))
        .map(|e| e.size)
        .sum()
}

/// 디렉토리와 그 하위 엔트리의 원래 경로 목록
///
/// 삭제/이름 변경처럼 디렉토리 전체를 대상으로 하는 작업에서 사용
pub fn dir_list_from_path(entries: &[FileEntry], dir: &str) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.is_descendant_of(dir) || e.full_path == normalize_full_path(dir, true))
        .map(|e| e.original_path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_entry_creation() {
        let entry = FileEntry::from_archive_path("docs/readme.txt", false);

        assert_eq!(entry.full_path, "/docs/readme.txt");
        assert_eq!(entry.name, "readme.txt");
        assert_eq!(entry.parent_path, "/docs/");
        assert_eq!(entry.content_type, "text/plain");
        assert!(!entry.is_directory);
    }

    #[test]
    fn test_directory_entry_paths() {
        let entry = FileEntry::from_archive_path("/docs/", true);
        assert_eq!(entry.full_path, "/docs/");
        assert_eq!(entry.name, "docs");
        assert_eq!(entry.parent_path, "/");
        assert_eq!(entry.content_type, DIRECTORY_CONTENT_TYPE);

        // 나중에 디렉토리로 판명된 경우 뒤쪽 `/` 추가
        let mut late = FileEntry::from_archive_path("assets", false);
        late.size = 99;
        late.set_directory(true);
        assert_eq!(late.full_path, "/assets/");
        assert_eq!(late.size, 0);
    }

    #[test]
    fn test_directory_size_sums_descendants() {
        let mut a = FileEntry::from_archive_path("docs/a.txt", false);
        a.size = 10;
        let mut b = FileEntry::from_archive_path("docs/sub/b.txt", false);
        b.size = 32;
        let mut other = FileEntry::from_archive_path("docsx/c.txt", false);
        other.size = 1000;
        let dir = FileEntry::from_archive_path("docs", true);
        let entries = vec![dir, a, b, other];

        assert_eq!(directory_size(&entries, "/docs/"), 42);
        assert_eq!(directory_size(&entries, "docs"), 42);
    }

    #[test]
    fn test_dir_list_from_path_includes_dir_itself() {
        let entries = vec![
            FileEntry::from_archive_path("docs/", true),
            FileEntry::from_archive_path("docs/a.txt", false),
            FileEntry::from_archive_path("top.txt", false),
        ];
        let list = dir_list_from_path(&entries, "/docs/");
        assert_eq!(list, vec!["docs/".to_string(), "docs/a.txt".to_string()]);
    }
}
