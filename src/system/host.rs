//! 세션/배치가 사용하는 사용자 상호작용 협력자
//!
//! GUI나 터미널 같은 표시 계층이 구현한다.

use std::path::{Path, PathBuf};

/// 패키지 설치 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallResult {
    Installed,
    Declined,
    Failed(String),
}

/// 사용자 확인/선택 요청
pub trait HostInterface {
    /// 없는 대상 디렉토리를 만들지
    fn confirm_create_directory(&mut self, path: &Path) -> bool;

    /// 이미 있는 파일을 덮어쓸지
    fn confirm_overwrite(&mut self, path: &Path) -> bool;

    /// 지원하지 않는 형식을 위한 OS 패키지 설치
    fn install_packages(&mut self, packages: &[String]) -> InstallResult;

    /// 파일들을 담을 새 압축 파일 경로 (취소하면 None)
    fn choose_archive_name(&mut self, files: &[PathBuf]) -> Option<PathBuf>;
}

/// 모든 질문에 같은 답을 하는 호스트 (`--force`, 테스트용)
#[derive(Debug, Clone, Default)]
pub struct AutoHost {
    pub answer: bool,
    pub archive_name: Option<PathBuf>,
    /// 받은 질문 기록
    pub asked: Vec<PathBuf>,
    pub install_requests: Vec<Vec<String>>,
}

impl AutoHost {
    pub fn accepting() -> Self {
        Self {
            answer: true,
            ..Self::default()
        }
    }

    pub fn declining() -> Self {
        Self::default()
    }
}

impl HostInterface for AutoHost {
    fn confirm_create_directory(&mut self, path: &Path) -> bool {
        self.asked.push(path.to_path_buf());
        self.answer
    }

    fn confirm_overwrite(&mut self, path: &Path) -> bool {
        self.asked.push(path.to_path_buf());
        self.answer
    }

    fn install_packages(&mut self, packages: &[String]) -> InstallResult {
        self.install_requests.push(packages.to_vec());
        if self.answer {
            InstallResult::Installed
        } else {
            InstallResult::Declined
        }
    }

    fn choose_archive_name(&mut self, _files: &[PathBuf]) -> Option<PathBuf> {
        self.archive_name.clone()
    }
}
