//! 압축 형식별 명령 드라이버
//!
//! 각 드라이버는 외부 도구 호출을 [`ProcessRunner`] 큐에 쌓고 호출마다
//! 전용 출력 파서를 붙인다. 실행과 완료 처리는 세션이 맡는다.

pub mod rar;
pub mod sevenzip;
pub mod tar;
pub mod zip;

use crate::models::{
    AddRequest, ArchiveAction, Capabilities, CapturedOutput, CompressionLevel, ExtractRequest,
    ProcError, ProcErrorKind,
};
use crate::system::{OutputParser, OutputStream, ParseEvent, ProcessRunner, ToolLocator};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

pub use rar::RarBackend;
pub use sevenzip::SevenZipBackend;
pub use tar::TarBackend;
pub use zip::ZipBackend;

/// 작업 하나를 위한 압축 파일 정보
#[derive(Clone, Copy)]
pub struct ArchiveContext<'a> {
    pub path: &'a Path,
    pub mime_type: &'a str,
    pub password: Option<&'a str>,
    pub encrypt_header: bool,
    pub compression: CompressionLevel,
    /// 분할 크기 (0 = 분할 안 함)
    pub volume_size: u64,
    /// 실행할 프로그램 선택용
    pub tools: &'a dyn ToolLocator,
}

impl<'a> ArchiveContext<'a> {
    pub fn new(path: &'a Path, mime_type: &'a str, tools: &'a dyn ToolLocator) -> Self {
        Self {
            path,
            mime_type,
            password: None,
            encrypt_header: false,
            compression: CompressionLevel::Normal,
            volume_size: 0,
            tools,
        }
    }

    /// 빈 문자열 암호는 암호 없음으로 취급
    pub fn password(&self) -> Option<&'a str> {
        self.password.filter(|p| !p.is_empty())
    }

    pub fn archive_arg(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// 드라이버가 추출 때 직접 처리할 수 있는 옵션
///
/// 처리하지 못하는 옵션은 세션이 로컬 파일과 비교해 대신 걸러내거나 거절한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendProperties {
    /// 이미 있는 파일을 건너뛰고 추출
    pub extract_can_avoid_overwrite: bool,
    /// 로컬 파일이 더 새로우면 건너뜀
    pub extract_can_skip_older: bool,
    /// 폴더 구조 없이 추출
    pub extract_can_junk_paths: bool,
}

/// 0이 아닌 종료 코드 중 허용할 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPolicy {
    /// 이 값 이하의 종료 코드는 성공으로 취급
    pub tolerated_status: i32,
}

impl ExitPolicy {
    pub const STRICT: ExitPolicy = ExitPolicy { tolerated_status: 0 };

    /// 경고성 종료 코드 1 허용
    pub const WARNINGS_OK: ExitPolicy = ExitPolicy { tolerated_status: 1 };

    pub fn tolerates(&self, status: Option<i32>) -> bool {
        matches!(status, Some(code) if code <= self.tolerated_status)
    }

    /// 허용 범위의 종료 코드면 오류를 지움. 지웠으면 true
    pub fn apply(&self, error: &mut ProcError) -> bool {
        if error.kind == ProcErrorKind::ExitedAbnormally && self.tolerates(error.status) {
            *error = ProcError::none();
            return true;
        }
        false
    }
}

/// 압축 형식 드라이버
pub trait ArchiveBackend {
    /// 형식 식별자 (`7z`, `rar`, ...)
    fn id(&self) -> &'static str;

    /// 처리할 수 있다고 주장하는 MIME 타입
    fn mime_types(&self) -> &'static [&'static str];

    /// `tools` 기준으로 `mime_type`에 대해 제공 가능한 능력
    fn capabilities(&self, mime_type: &str, tools: &dyn ToolLocator) -> Capabilities;

    /// 필요한 OS 패키지 (쉼표 구분)
    fn packages(&self, mime_type: &str) -> Option<&'static str>;

    fn properties(&self) -> BackendProperties;

    fn list(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner);

    fn add(&self, ctx: &ArchiveContext<'_>, request: &AddRequest, runner: &mut ProcessRunner);

    fn delete(&self, ctx: &ArchiveContext<'_>, files: &[String], runner: &mut ProcessRunner);

    /// `total_files`는 진행률 계산용 (모를 때 0)
    fn extract(
        &self,
        ctx: &ArchiveContext<'_>,
        request: &ExtractRequest,
        total_files: usize,
        runner: &mut ProcessRunner,
    );

    fn test(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner);

    fn exit_policy(&self, _action: ArchiveAction) -> ExitPolicy {
        ExitPolicy::STRICT
    }

    /// 일반 종료 코드 실패를 형식별 오류로 재분류
    fn handle_error(&self, action: ArchiveAction, error: &mut ProcError, _output: &CapturedOutput) {
        self.exit_policy(action).apply(error);
    }
}

/// 기본 드라이버 목록 (등록 순서 = 우선순위)
pub fn default_backends() -> Vec<Box<dyn ArchiveBackend>> {
    vec![
        Box::new(TarBackend),
        Box::new(SevenZipBackend),
        Box::new(RarBackend),
        Box::new(ZipBackend),
    ]
}

/// `"<동사> <파일이름>"` 형태의 진행 라인 파서
///
/// 진행률 = 처리한 파일 수 / (전체 파일 수 + 1)
pub struct ProgressParser {
    verbs: &'static [&'static str],
    total: usize,
    processed: usize,
}

impl ProgressParser {
    pub fn new(verbs: &'static [&'static str], total: usize) -> Self {
        Self {
            verbs,
            total,
            processed: 0,
        }
    }

    pub fn boxed(verbs: &'static [&'static str], total: usize) -> Box<dyn OutputParser> {
        Box::new(Self::new(verbs, total))
    }
}

impl OutputParser for ProgressParser {
    fn parse_line(&mut self, stream: OutputStream, line: &str, events: &mut Vec<ParseEvent>) {
        if stream != OutputStream::Stdout {
            return;
        }
        let Some(name) = self
            .verbs
            .iter()
            .find_map(|verb| line.strip_prefix(verb))
            .map(|rest| strip_status_suffix(rest.trim()))
        else {
            return;
        };
        if name.is_empty() {
            return;
        }

        self.processed += 1;
        events.push(ParseEvent::Message(name.to_string()));
        if self.total > 0 {
            let fraction = self.processed as f64 / (self.total + 1) as f64;
            events.push(ParseEvent::Progress(fraction.min(1.0)));
        }
    }
}

/// `"a.txt     OK"` 처럼 뒤에 붙는 상태 표시 제거
fn strip_status_suffix(name: &str) -> &str {
    match name.strip_suffix("OK") {
        Some(rest) if rest.ends_with(char::is_whitespace) => rest.trim_end(),
        _ => name,
    }
}

/// 압축 수준 플래그 선택 (`[매우 빠름, 빠름, 보통, 최대]`)
pub(crate) fn compression_flag(level: CompressionLevel, flags: [&'static str; 4]) -> &'static str {
    match level {
        CompressionLevel::VeryFast => flags[0],
        CompressionLevel::Fast => flags[1],
        CompressionLevel::Normal => flags[2],
        CompressionLevel::Maximum => flags[3],
    }
}

/// 공백으로 구분된 앞쪽 `count`개 필드와 나머지 문자열
///
/// 나머지는 파일 이름처럼 공백을 포함할 수 있어 그대로 보존한다.
pub(crate) fn split_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line.trim_start();
    while fields.len() < count {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        None
    } else {
        Some((fields, rest))
    }
}

/// 작업용 임시 디렉토리 경로 (생성은 명령 큐 안에서)
pub(crate) fn scratch_dir(base: &Path, tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let serial = COUNTER.fetch_add(1, Ordering::Relaxed);
    let stamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    base.join(format!(
        ".bokslarc-{}-{}-{}-{}",
        tag,
        std::process::id(),
        serial,
        stamp
    ))
}

/// 오류 메시지 라인에서 `phrase` 뒤의 파일 이름 추출
pub(crate) fn name_after(line: &str, phrase: &str) -> Option<String> {
    let start = line.find(phrase)? + phrase.len();
    let name = line[start..]
        .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .trim_end();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut dyn OutputParser, lines: &[&str]) -> Vec<ParseEvent> {
        let mut events = Vec::new();
        for line in lines {
            parser.parse_line(OutputStream::Stdout, line, &mut events);
        }
        parser.finish(&mut events);
        events
    }

    #[test]
    fn test_progress_parser_fraction_uses_total_plus_one() {
        let mut parser = ProgressParser::new(&["Compressing  "], 3);
        let events = feed(
            &mut parser,
            &["7-Zip banner", "Compressing  a.txt", "Compressing  dir/b.txt"],
        );
        assert_eq!(
            events,
            vec![
                ParseEvent::Message("a.txt".to_string()),
                ParseEvent::Progress(0.25),
                ParseEvent::Message("dir/b.txt".to_string()),
                ParseEvent::Progress(0.5),
            ]
        );
    }

    #[test]
    fn test_progress_parser_without_total_only_reports_names() {
        let mut parser = ProgressParser::new(&["Extracting  "], 0);
        let events = feed(&mut parser, &["Extracting  a.txt", "Extracting  BOOK     OK"]);
        assert_eq!(
            events,
            vec![
                ParseEvent::Message("a.txt".to_string()),
                ParseEvent::Message("BOOK".to_string()),
            ]
        );
    }

    #[test]
    fn test_progress_parser_ignores_stderr() {
        let mut parser = ProgressParser::new(&["Testing  "], 1);
        let mut events = Vec::new();
        parser.parse_line(OutputStream::Stderr, "Testing  a.txt", &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_exit_policy_apply() {
        let mut error = ProcError::exited(1);
        assert!(ExitPolicy::WARNINGS_OK.apply(&mut error));
        assert!(!error.is_error());

        let mut error = ProcError::exited(1);
        assert!(!ExitPolicy::STRICT.apply(&mut error));
        assert_eq!(error.kind, ProcErrorKind::ExitedAbnormally);

        let mut error = ProcError::new(ProcErrorKind::CommandNotFound);
        assert!(!ExitPolicy::WARNINGS_OK.apply(&mut error));
    }

    #[test]
    fn test_split_fields_keeps_name_with_spaces() {
        let (fields, rest) =
            split_fields("-rw-r--r-- u/g  42 2020-01-02 03:04 my file.txt", 5).expect("fields");
        assert_eq!(fields, vec!["-rw-r--r--", "u/g", "42", "2020-01-02", "03:04"]);
        assert_eq!(rest, "my file.txt");
        assert!(split_fields("only three fields", 3).is_none());
    }

    #[test]
    fn test_scratch_dirs_are_unique() {
        let base = Path::new("/tmp");
        let a = scratch_dir(base, "tar");
        let b = scratch_dir(base, "tar");
        assert_ne!(a, b);
        assert!(a.starts_with(base));
    }

    #[test]
    fn test_name_after_phrase() {
        assert_eq!(
            name_after("Cannot find volume a.part2.rar", "Cannot find volume"),
            Some("a.part2.rar".to_string())
        );
        assert_eq!(
            name_after("Missing volume : a.7z.002", "Missing volume"),
            Some("a.7z.002".to_string())
        );
        assert_eq!(name_after("Cannot find volume", "Cannot find volume"), None);
    }
}
