//! 압축 작업 오류 분류
//!
//! 외부 도구 실행 결과를 분류한 값. Rust 오류 타입이 아니라 완료 이벤트에
//! 실려 전달되는 값이므로 `Clone`/`PartialEq`를 지원한다.

use std::fmt;

/// 오류 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcErrorKind {
    /// 오류 없음
    None,
    /// 분류되지 않은 실패
    Generic,
    /// 실행 파일을 찾을 수 없음
    CommandNotFound,
    /// 0이 아닌 종료 코드
    ExitedAbnormally,
    /// 프로세스 생성 실패 (OS 수준)
    Spawn,
    /// 사용자 취소
    Stopped,
    /// 암호 필요 (재시도 가능)
    AskPassword,
    /// 분할 압축의 볼륨 누락
    MissingVolume,
    /// 지원하지 않는 형식 (패키지 설치로 복구 가능)
    UnsupportedFormat,
    /// 예약됨, 현재 어떤 드라이버도 발생시키지 않음
    BadCharset,
    /// 서브프로세스 출력 스트림 오류
    IoChannel,
}

/// 분류된 작업 오류
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcError {
    pub kind: ProcErrorKind,
    /// `ExitedAbnormally`일 때 종료 코드
    pub status: Option<i32>,
    /// 사람이 읽을 수 있는 상세 메시지 (OS 오류 메시지 등)
    pub details: Option<String>,
    /// `MissingVolume`일 때 누락된 볼륨 파일 이름
    pub missing_volume: Option<String>,
}

impl ProcError {
    pub fn none() -> Self {
        Self::new(ProcErrorKind::None)
    }

    pub fn new(kind: ProcErrorKind) -> Self {
        Self {
            kind,
            status: None,
            details: None,
            missing_volume: None,
        }
    }

    pub fn with_details(kind: ProcErrorKind, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::new(kind)
        }
    }

    pub fn generic(details: impl Into<String>) -> Self {
        Self::with_details(ProcErrorKind::Generic, details)
    }

    pub fn exited(status: i32) -> Self {
        Self {
            status: Some(status),
            ..Self::new(ProcErrorKind::ExitedAbnormally)
        }
    }

    pub fn missing_volume(name: impl Into<String>) -> Self {
        Self {
            missing_volume: Some(name.into()),
            ..Self::new(ProcErrorKind::MissingVolume)
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind != ProcErrorKind::None
    }

    /// 배치를 중단하지 않고 일시 정지시키는 오류인지
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            ProcErrorKind::AskPassword | ProcErrorKind::UnsupportedFormat
        )
    }

    /// 짧은 분류 사유
    pub fn reason(&self) -> String {
        match self.kind {
            ProcErrorKind::None => String::new(),
            ProcErrorKind::CommandNotFound => "Command not found.".to_string(),
            ProcErrorKind::ExitedAbnormally => match self.status {
                Some(status) => format!("Command exited abnormally (status {}).", status),
                None => "Command exited abnormally.".to_string(),
            },
            ProcErrorKind::Stopped => "Operation stopped.".to_string(),
            ProcErrorKind::AskPassword => "A password is required.".to_string(),
            ProcErrorKind::MissingVolume => match &self.missing_volume {
                Some(name) => format!("Could not find the volume: {}", name),
                None => "Could not find a volume.".to_string(),
            },
            ProcErrorKind::UnsupportedFormat => "Archive type not supported.".to_string(),
            ProcErrorKind::BadCharset => "Invalid file name encoding.".to_string(),
            ProcErrorKind::Spawn | ProcErrorKind::IoChannel | ProcErrorKind::Generic => self
                .details
                .clone()
                .unwrap_or_else(|| "An error occurred.".to_string()),
        }
    }
}

impl Default for ProcError {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// 서브프로세스에서 수집한 원시 출력
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CapturedOutput {
    /// 오류 표시용 원시 출력 (stderr가 있으면 stderr, 없으면 stdout)
    pub fn raw(&self) -> &[String] {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// stdout, stderr 전체 라인을 뒤에서부터 순회
    pub fn lines_rev(&self) -> impl Iterator<Item = &str> {
        self.stderr
            .iter()
            .rev()
            .chain(self.stdout.iter().rev())
            .map(String::as_str)
    }

    /// 어떤 라인이든 `needle`을 포함하는지
    pub fn contains(&self, needle: &str) -> bool {
        self.lines_rev().any(|line| line.contains(needle))
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    pub fn append(&mut self, other: CapturedOutput) {
        self.stdout.extend(other.stdout);
        self.stderr.extend(other.stderr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(ProcError::new(ProcErrorKind::AskPassword).is_recoverable());
        assert!(ProcError::new(ProcErrorKind::UnsupportedFormat).is_recoverable());
        assert!(!ProcError::new(ProcErrorKind::Stopped).is_recoverable());
        assert!(!ProcError::exited(2).is_recoverable());
        assert!(!ProcError::none().is_error());
    }

    #[test]
    fn test_reason_carries_payload() {
        assert_eq!(
            ProcError::exited(2).reason(),
            "Command exited abnormally (status 2)."
        );
        assert_eq!(
            ProcError::missing_volume("a.part2.rar").reason(),
            "Could not find the volume: a.part2.rar"
        );
        assert_eq!(ProcError::generic("boom").to_string(), "boom");
    }

    #[test]
    fn test_captured_output_prefers_stderr() {
        let mut output = CapturedOutput {
            stdout: vec!["listing".to_string()],
            stderr: Vec::new(),
        };
        assert_eq!(output.raw(), ["listing".to_string()]);

        output.stderr.push("Wrong password?".to_string());
        assert_eq!(output.raw(), ["Wrong password?".to_string()]);
        assert!(output.contains("password"));
    }
}
