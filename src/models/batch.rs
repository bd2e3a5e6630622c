//! 배치 작업 모델
//!
//! 배치 큐에 들어가는 한 단계와 그 인자. 각 변형이 인자를 직접 소유한다.

use std::path::PathBuf;

/// 추출 인자
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractParams {
    /// 추출할 엔트리 (비어 있으면 전체)
    pub files: Vec<String>,
    /// 대상 디렉토리 (None이면 기본 디렉토리 또는 압축 파일 옆)
    pub destination: Option<PathBuf>,
    pub base_dir: Option<String>,
    pub skip_older: bool,
    pub overwrite: bool,
    pub junk_paths: bool,
}

impl ExtractParams {
    /// 지정 디렉토리로 전체 추출 (덮어쓰기)
    pub fn to_dir(destination: Option<PathBuf>) -> Self {
        Self {
            destination,
            overwrite: true,
            ..Self::default()
        }
    }
}

/// 이름 변경 인자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameParams {
    /// 변경할 항목의 원래 경로
    pub path_to_rename: String,
    pub old_name: String,
    pub new_name: String,
    /// 항목이 있는 압축 파일 내부 디렉토리 (`/`로 시작하고 끝남)
    pub current_dir: String,
    pub is_dir: bool,
    /// 디렉토리 엔트리의 원래 경로
    pub original_path: String,
}

/// 클립보드 작업 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardOp {
    Copy,
    Cut,
}

/// 다른 압축 파일에서 복사/잘라내기한 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardData {
    /// 원본 압축 파일
    pub archive_path: PathBuf,
    pub archive_password: Option<String>,
    pub op: ClipboardOp,
    /// 원본 압축 파일의 엔트리 원래 경로
    pub files: Vec<String>,
    /// 원본 내 기준 디렉토리 (`/`로 시작하고 끝남)
    pub base_dir: String,
    /// 붙여넣을 대상 디렉토리 (`/`로 시작하고 끝남)
    pub current_dir: String,
}

/// 다른 이름/형식으로 저장 인자
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveAsParams {
    pub path: PathBuf,
    pub password: Option<String>,
    pub encrypt_header: bool,
    /// 분할 크기 (0 = 분할 안 함)
    pub volume_size: u64,
}

/// 배치 단계
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAction {
    /// 압축 파일 열기 (없으면 새로 생성)
    Load(PathBuf),
    /// 파일들을 담을 압축 파일 이름을 묻고 생성
    Open(Vec<PathBuf>),
    /// 로컬 파일 추가
    Add(Vec<PathBuf>),
    Extract(ExtractParams),
    /// 압축 파일 옆 새 폴더로 추출
    ExtractHere(ExtractParams),
    Rename(RenameParams),
    Paste(ClipboardData),
    SaveAs(SaveAsParams),
    Test,
    Close,
    Quit,
}

impl BatchAction {
    /// 로그용 이름
    pub fn name(&self) -> &'static str {
        match self {
            BatchAction::Load(_) => "LOAD",
            BatchAction::Open(_) => "OPEN",
            BatchAction::Add(_) => "ADD",
            BatchAction::Extract(_) => "EXTRACT",
            BatchAction::ExtractHere(_) => "EXTRACT HERE",
            BatchAction::Rename(_) => "RENAME",
            BatchAction::Paste(_) => "PASTE",
            BatchAction::SaveAs(_) => "SAVE_AS",
            BatchAction::Test => "TEST",
            BatchAction::Close => "CLOSE",
            BatchAction::Quit => "QUIT",
        }
    }
}
