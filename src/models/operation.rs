//! 압축 작업 모델
//!
//! 세션이 수행하는 작업 종류, 압축 수준, 작업 요청/결과 구조 정의

use crate::models::proc_error::{CapturedOutput, ProcError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 작업 유형 (완료 이벤트가 가리키는 작업)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveAction {
    /// 새 압축 파일 생성
    CreatingNewArchive,
    /// 압축 파일 열기
    LoadingArchive,
    /// 목록 다시 읽기
    ListingContent,
    /// 파일 추가
    AddingFiles,
    /// 파일 삭제
    DeletingFiles,
    /// 파일 추출
    ExtractingFiles,
    /// 무결성 검사
    TestingArchive,
    /// 이름 변경
    RenamingFiles,
    /// 다른 압축 파일에서 붙여넣기
    PastingFiles,
    /// 다른 형식으로 저장
    SavingAs,
}

impl ArchiveAction {
    /// 작업 이름 반환
    pub fn name(&self) -> &'static str {
        match self {
            ArchiveAction::CreatingNewArchive => "Creating archive",
            ArchiveAction::LoadingArchive => "Loading archive",
            ArchiveAction::ListingContent => "Reading archive",
            ArchiveAction::AddingFiles => "Adding files",
            ArchiveAction::DeletingFiles => "Deleting files",
            ArchiveAction::ExtractingFiles => "Extracting files",
            ArchiveAction::TestingArchive => "Testing archive",
            ArchiveAction::RenamingFiles => "Renaming files",
            ArchiveAction::PastingFiles => "Pasting files",
            ArchiveAction::SavingAs => "Saving archive",
        }
    }

    /// 실패 시 표시할 제목
    ///
    /// `archive_name`은 열기 실패 메시지에만 사용
    pub fn failure_headline(&self, archive_name: &str) -> String {
        match self {
            ArchiveAction::CreatingNewArchive => "Could not create the archive".to_string(),
            ArchiveAction::LoadingArchive => format!("Could not open \"{}\"", archive_name),
            ArchiveAction::ListingContent => {
                "An error occurred while loading the archive.".to_string()
            }
            ArchiveAction::AddingFiles | ArchiveAction::PastingFiles => {
                "An error occurred while adding files to the archive.".to_string()
            }
            ArchiveAction::DeletingFiles => {
                "An error occurred while deleting files from the archive.".to_string()
            }
            ArchiveAction::ExtractingFiles => {
                "An error occurred while extracting files.".to_string()
            }
            ArchiveAction::TestingArchive => "An error occurred while testing archive.".to_string(),
            ArchiveAction::RenamingFiles => {
                "An error occurred while renaming files in the archive.".to_string()
            }
            ArchiveAction::SavingAs => "An error occurred while saving the archive.".to_string(),
        }
    }

    /// 읽기 전용 작업인지 (종료 코드 허용 정책에 사용)
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            ArchiveAction::LoadingArchive
                | ArchiveAction::ListingContent
                | ArchiveAction::TestingArchive
        )
    }
}

/// 압축 수준 (4단계 고정)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionLevel {
    VeryFast,
    Fast,
    #[default]
    Normal,
    Maximum,
}

/// 파일 추가 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    /// `base_dir` 기준 상대 경로 목록
    pub files: Vec<String>,
    /// 추가할 파일의 기준 디렉토리 (로컬)
    pub base_dir: PathBuf,
    /// 압축 파일 내부 대상 디렉토리 (`/` = 루트)
    pub dest_dir: String,
    /// 더 새로운 파일만 갱신
    pub update: bool,
    /// 디렉토리 재귀 추가
    pub recursive: bool,
}

impl AddRequest {
    pub fn new(files: Vec<String>, base_dir: PathBuf) -> Self {
        Self {
            files,
            base_dir,
            dest_dir: "/".to_string(),
            update: false,
            recursive: true,
        }
    }
}

/// 파일 추출 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    /// 추출할 엔트리의 원래 경로 (비어 있으면 전체)
    pub files: Vec<String>,
    /// 대상 디렉토리
    pub destination: PathBuf,
    /// 압축 파일 내부 기준 디렉토리 (경로 일부 제거용)
    pub base_dir: Option<String>,
    /// 기존 파일 덮어쓰기
    pub overwrite: bool,
    /// 오래된 파일 건너뛰기
    pub skip_older: bool,
    /// 경로 없이 파일만 추출
    pub junk_paths: bool,
}

impl ExtractRequest {
    pub fn new(files: Vec<String>, destination: PathBuf) -> Self {
        Self {
            files,
            destination,
            base_dir: None,
            overwrite: true,
            skip_older: false,
            junk_paths: false,
        }
    }
}

/// 작업 완료 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: ArchiveAction,
    pub error: ProcError,
    /// 오류 표시용 원시 출력
    pub output: CapturedOutput,
}

impl ActionOutcome {
    pub fn success(action: ArchiveAction) -> Self {
        Self {
            action,
            error: ProcError::none(),
            output: CapturedOutput::default(),
        }
    }

    pub fn failure(action: ArchiveAction, error: ProcError) -> Self {
        Self {
            action,
            error,
            output: CapturedOutput::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.error.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proc_error::ProcErrorKind;

    #[test]
    fn test_failure_headline_uses_archive_name_for_loading() {
        assert_eq!(
            ArchiveAction::LoadingArchive.failure_headline("a.7z"),
            "Could not open \"a.7z\""
        );
        assert_eq!(
            ArchiveAction::ExtractingFiles.failure_headline("a.7z"),
            "An error occurred while extracting files."
        );
    }

    #[test]
    fn test_read_only_actions() {
        assert!(ArchiveAction::LoadingArchive.is_read_only());
        assert!(ArchiveAction::TestingArchive.is_read_only());
        assert!(!ArchiveAction::AddingFiles.is_read_only());
        assert!(!ArchiveAction::ExtractingFiles.is_read_only());
    }

    #[test]
    fn test_compression_level_serde_names() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            level: CompressionLevel,
        }
        let text = toml::to_string(&Wrapper {
            level: CompressionLevel::VeryFast,
        })
        .expect("serialize");
        assert!(text.contains("very-fast"));
        let parsed: Wrapper = toml::from_str("level = \"maximum\"").expect("parse");
        assert_eq!(parsed.level, CompressionLevel::Maximum);
    }

    #[test]
    fn test_outcome_success_flag() {
        assert!(ActionOutcome::success(ArchiveAction::TestingArchive).is_success());
        let failed = ActionOutcome::failure(
            ArchiveAction::TestingArchive,
            ProcError::new(ProcErrorKind::Stopped),
        );
        assert!(!failed.is_success());
    }
}
