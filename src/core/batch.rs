//! 배치 작업 순차 실행
//!
//! `[Load, Extract, Close]` 같은 작업 목록을 세션에 하나씩 넘기고
//! 완료 결과에 따라 다음 단계로 진행/일시 정지/중단한다.

use crate::core::session::ArchiveSession;
use crate::models::{
    ActionOutcome, AddRequest, BatchAction, ExtractParams, ExtractRequest, ProcError,
    ProcErrorKind,
};
use crate::system::{HostInterface, InstallResult};
use crate::utils::error::{BokslArcError, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// 배치 진행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// 시작 전
    Idle,
    Running,
    /// 암호 입력이나 패키지 설치 후 `resume` 가능
    Suspended(ProcError),
    Finished,
    /// None = 사용자 중지 (오류 아님)
    Aborted(Option<ProcError>),
    Quit,
}

/// 한 단계를 실행한 직후 결과
enum Step {
    /// 세션 완료 대기
    Waiting,
    /// 다음 단계로 바로 진행
    Continue,
    Done(BatchStatus),
}

#[derive(Debug)]
pub struct BatchSequencer {
    queue: VecDeque<BatchAction>,
    /// 실행 중인 단계 (재시도용 사본)
    current: Option<BatchAction>,
    status: BatchStatus,
    started: bool,
    default_extract_dir: Option<PathBuf>,
    /// 마지막으로 끝난 단계의 결과 (오류 표시용)
    last_outcome: Option<ActionOutcome>,
}

impl Default for BatchSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchSequencer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            status: BatchStatus::Idle,
            started: false,
            default_extract_dir: None,
            last_outcome: None,
        }
    }

    pub fn with_actions(actions: impl IntoIterator<Item = BatchAction>) -> Self {
        let mut batch = Self::new();
        batch.queue.extend(actions);
        batch
    }

    /// 대상 디렉토리 없는 추출에 쓸 기본 디렉토리
    pub fn set_default_extract_dir(&mut self, dir: Option<PathBuf>) {
        self.default_extract_dir = dir;
    }

    /// 단계 추가 (시작 후에는 불가)
    pub fn append(&mut self, action: BatchAction) -> Result<()> {
        if self.started {
            return Err(BokslArcError::BatchRunning);
        }
        self.queue.push_back(action);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn status(&self) -> &BatchStatus {
        &self.status
    }

    pub fn current(&self) -> Option<&BatchAction> {
        self.current.as_ref()
    }

    pub fn last_outcome(&self) -> Option<&ActionOutcome> {
        self.last_outcome.as_ref()
    }

    /// 남은 단계 수 (현재 단계 제외)
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn start(&mut self, session: &mut ArchiveSession, host: &mut dyn HostInterface) -> BatchStatus {
        if self.started {
            return self.status.clone();
        }
        log::info!("batch: started with {} actions", self.queue.len());
        self.started = true;
        self.status = BatchStatus::Running;
        self.advance(session, host)
    }

    /// 세션 진행 처리. 단계 완료 시 다음 단계 시작
    pub fn poll(&mut self, session: &mut ArchiveSession, host: &mut dyn HostInterface) -> BatchStatus {
        if self.status != BatchStatus::Running {
            return self.status.clone();
        }
        let Some(outcome) = session.poll() else {
            return BatchStatus::Running;
        };

        let error = outcome.error.clone();
        self.last_outcome = Some(outcome);
        if !error.is_error() {
            return self.advance(session, host);
        }
        if error.is_recoverable() {
            log::warn!("batch: suspended on {}", error);
            self.status = BatchStatus::Suspended(error);
            return self.status.clone();
        }

        self.queue.clear();
        if error.kind == ProcErrorKind::Stopped {
            log::info!("batch: stopped by user");
            self.status = BatchStatus::Aborted(None);
        } else {
            log::warn!("batch: aborted: {}", error);
            self.status = BatchStatus::Aborted(Some(error));
        }
        self.status.clone()
    }

    /// 일시 정지된 단계를 같은 인자로 다시 실행
    pub fn resume(&mut self, session: &mut ArchiveSession, host: &mut dyn HostInterface) -> BatchStatus {
        if !matches!(self.status, BatchStatus::Suspended(_)) {
            return self.status.clone();
        }
        let Some(action) = self.current.clone() else {
            return self.advance(session, host);
        };
        log::info!("batch: resuming {}", action.name());
        self.status = BatchStatus::Running;
        match self.execute(&action, session, host) {
            Step::Waiting => BatchStatus::Running,
            Step::Continue => self.advance(session, host),
            Step::Done(status) => {
                self.queue.clear();
                self.status = status;
                self.status.clone()
            }
        }
    }

    /// 배치 포기
    pub fn reset(&mut self) {
        self.queue.clear();
        self.current = None;
        self.started = false;
        self.status = BatchStatus::Idle;
        self.last_outcome = None;
    }

    /// 세션 완료까지 반복 (CLI, 테스트용)
    pub fn run(&mut self, session: &mut ArchiveSession, host: &mut dyn HostInterface) -> BatchStatus {
        let mut status = if self.started {
            self.status.clone()
        } else {
            self.start(session, host)
        };
        while status == BatchStatus::Running {
            status = self.poll(session, host);
            if status == BatchStatus::Running {
                thread::sleep(Duration::from_millis(1));
            }
        }
        status
    }

    fn advance(&mut self, session: &mut ArchiveSession, host: &mut dyn HostInterface) -> BatchStatus {
        loop {
            let Some(action) = self.queue.pop_front() else {
                log::info!("batch: finished");
                self.current = None;
                self.status = BatchStatus::Finished;
                return BatchStatus::Finished;
            };
            log::debug!("batch: {}", action.name());
            self.current = Some(action.clone());
            match self.execute(&action, session, host) {
                Step::Waiting => return BatchStatus::Running,
                Step::Continue => continue,
                Step::Done(status) => {
                    self.queue.clear();
                    self.status = status;
                    return self.status.clone();
                }
            }
        }
    }

    fn execute(
        &mut self,
        action: &BatchAction,
        session: &mut ArchiveSession,
        host: &mut dyn HostInterface,
    ) -> Step {
        let result = match action {
            BatchAction::Load(path) => {
                if path.exists() {
                    session.load(path.clone(), None)
                } else {
                    session.create(path.clone())
                }
            }
            BatchAction::Open(files) => {
                let Some(archive) = host.choose_archive_name(files) else {
                    log::info!("batch: no archive name chosen");
                    return Step::Done(BatchStatus::Aborted(None));
                };
                // 만든 뒤 바로 추가 (재시도 때는 이미 들어 있음)
                let add = BatchAction::Add(files.clone());
                if self.queue.front() != Some(&add) {
                    self.queue.push_front(add);
                }
                if archive.exists() {
                    session.load(archive, None)
                } else {
                    session.create(archive)
                }
            }
            BatchAction::Add(files) => match add_request_from_paths(files) {
                Some(request) => session.add(request),
                None => {
                    return Step::Done(BatchStatus::Aborted(Some(ProcError::generic(
                        "No files to add.",
                    ))))
                }
            },
            BatchAction::Extract(params) => {
                let request = self.extract_request(params, session.path());
                session.extract(request, host)
            }
            BatchAction::ExtractHere(params) => {
                session.extract_here(params.skip_older, params.overwrite, params.junk_paths, host)
            }
            BatchAction::Rename(params) => session.rename(params.clone()),
            BatchAction::Paste(data) => session.paste(data.clone()),
            BatchAction::SaveAs(params) => session.save_as(params.clone()),
            BatchAction::Test => session.test(),
            BatchAction::Close => {
                return match session.close() {
                    Ok(()) => Step::Continue,
                    Err(e) => Step::Done(BatchStatus::Aborted(Some(ProcError::generic(
                        e.to_string(),
                    )))),
                };
            }
            BatchAction::Quit => return Step::Done(BatchStatus::Quit),
        };

        match result {
            Ok(()) => Step::Waiting,
            Err(e) => {
                log::warn!("batch: {} rejected: {}", action.name(), e);
                Step::Done(BatchStatus::Aborted(Some(ProcError::generic(e.to_string()))))
            }
        }
    }

    fn extract_request(&self, params: &ExtractParams, archive: Option<&Path>) -> ExtractRequest {
        let destination = params
            .destination
            .clone()
            .or_else(|| self.default_extract_dir.clone())
            .or_else(|| archive.and_then(Path::parent).map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let mut request = ExtractRequest::new(params.files.clone(), destination);
        request.base_dir = params.base_dir.clone();
        request.overwrite = params.overwrite;
        request.skip_older = params.skip_older;
        request.junk_paths = params.junk_paths;
        request
    }
}

/// 로컬 경로 목록 → 추가 요청
///
/// 기준 디렉토리는 모든 파일 부모의 가장 깊은 공통 조상이고, 파일은 그 아래
/// 상대 경로로 담긴다. 절대 경로와 상대 경로가 섞이면 None.
pub fn add_request_from_paths(files: &[PathBuf]) -> Option<AddRequest> {
    let mut common: Option<PathBuf> = None;
    for file in files {
        let parent = file.parent().unwrap_or_else(|| Path::new(""));
        common = Some(match common {
            None => parent.to_path_buf(),
            Some(base) => base
                .components()
                .zip(parent.components())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }
    let common = common?;

    let (base_dir, relative) = if common.as_os_str().is_empty() {
        if files.iter().any(|file| file.is_absolute()) {
            log::warn!("batch: cannot mix absolute and relative paths in one add");
            return None;
        }
        let relative = files
            .iter()
            .map(|file| file.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        (PathBuf::from("."), relative)
    } else {
        let relative = files
            .iter()
            .map(|file| {
                file.strip_prefix(&common)
                    .ok()
                    .filter(|rel| !rel.as_os_str().is_empty())
                    .map(|rel| rel.to_string_lossy().into_owned())
            })
            .collect::<Option<Vec<_>>>()?;
        (common, relative)
    };
    Some(AddRequest::new(relative, base_dir))
}

/// 압축 파일을 열어 새 폴더로 추출하고 닫기
pub fn extract_here_batch(archive: impl Into<PathBuf>) -> Vec<BatchAction> {
    vec![
        BatchAction::Load(archive.into()),
        BatchAction::ExtractHere(ExtractParams::to_dir(None)),
        BatchAction::Close,
    ]
}

/// 압축 파일을 열어 `destination`(None이면 기본 디렉토리)으로 추출하고 닫기
pub fn extract_batch(archive: impl Into<PathBuf>, destination: Option<PathBuf>) -> Vec<BatchAction> {
    vec![
        BatchAction::Load(archive.into()),
        BatchAction::Extract(ExtractParams::to_dir(destination)),
        BatchAction::Close,
    ]
}

/// 압축 파일을 열어 (없으면 생성) 파일을 추가하고 닫기
pub fn add_batch(archive: impl Into<PathBuf>, files: Vec<PathBuf>) -> Vec<BatchAction> {
    vec![
        BatchAction::Load(archive.into()),
        BatchAction::Add(files),
        BatchAction::Close,
    ]
}

/// 지원하지 않는 형식: 필요한 패키지 설치 후 도구 재확인. 설치했으면 true
pub fn remediate_unsupported_format(
    session: &mut ArchiveSession,
    host: &mut dyn HostInterface,
    mime_type: &str,
) -> bool {
    let packages = session.registry().packages_for(mime_type);
    if packages.is_empty() {
        log::warn!("batch: no package provides {}", mime_type);
        return false;
    }
    match host.install_packages(&packages) {
        InstallResult::Installed => {
            log::info!("batch: installed {}", packages.join(", "));
            session.refresh_backends();
            true
        }
        InstallResult::Declined => false,
        InstallResult::Failed(reason) => {
            log::warn!("batch: package installation failed: {}", reason);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_wrap_with_load_and_close() {
        let actions = extract_batch("/tmp/a.7z", Some(PathBuf::from("/tmp/out")));
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0], BatchAction::Load(PathBuf::from("/tmp/a.7z")));
        assert!(matches!(&actions[1], BatchAction::Extract(p) if p.destination == Some(PathBuf::from("/tmp/out"))));
        assert_eq!(actions[2], BatchAction::Close);

        let names: Vec<&str> = extract_here_batch("/tmp/a.7z")
            .iter()
            .map(BatchAction::name)
            .collect();
        assert_eq!(names, vec!["LOAD", "EXTRACT HERE", "CLOSE"]);

        let add = add_batch("/tmp/a.zip", vec![PathBuf::from("/tmp/x.txt")]);
        assert_eq!(add[1], BatchAction::Add(vec![PathBuf::from("/tmp/x.txt")]));
    }

    #[test]
    fn test_add_request_from_paths() {
        let request = add_request_from_paths(&[
            PathBuf::from("/home/user/docs/a.txt"),
            PathBuf::from("/home/user/docs/sub"),
            PathBuf::from("/elsewhere/b.txt"),
        ])
        .expect("request");
        assert_eq!(request.base_dir, PathBuf::from("/"));
        assert_eq!(
            request.files,
            vec!["home/user/docs/a.txt", "home/user/docs/sub", "elsewhere/b.txt"]
        );
        assert!(request.recursive);

        let request = add_request_from_paths(&[
            PathBuf::from("/home/user/docs/a.txt"),
            PathBuf::from("/home/user/docs/sub"),
            PathBuf::from("/home/user/pics/c.png"),
        ])
        .expect("request");
        assert_eq!(request.base_dir, PathBuf::from("/home/user"));
        assert_eq!(request.files, vec!["docs/a.txt", "docs/sub", "pics/c.png"]);

        let request = add_request_from_paths(&[
            PathBuf::from("/home/user/docs/a.txt"),
            PathBuf::from("/home/user/docs/b.txt"),
        ])
        .expect("request");
        assert_eq!(request.base_dir, PathBuf::from("/home/user/docs"));
        assert_eq!(request.files, vec!["a.txt", "b.txt"]);

        let request = add_request_from_paths(&[PathBuf::from("notes.txt")]).expect("request");
        assert_eq!(request.base_dir, PathBuf::from("."));
        assert_eq!(request.files, vec!["notes.txt"]);

        let request = add_request_from_paths(&[PathBuf::from("docs/a.txt"), PathBuf::from("b.txt")])
            .expect("request");
        assert_eq!(request.base_dir, PathBuf::from("."));
        assert_eq!(request.files, vec!["docs/a.txt", "b.txt"]);

        assert!(add_request_from_paths(&[PathBuf::from("/abs/a.txt"), PathBuf::from("b.txt")]).is_none());
        assert!(add_request_from_paths(&[]).is_none());
    }

    #[test]
    fn test_append_rejected_after_start() {
        let mut batch = BatchSequencer::new();
        batch.append(BatchAction::Quit).expect("append before start");
        batch.started = true;
        assert!(matches!(
            batch.append(BatchAction::Test),
            Err(BokslArcError::BatchRunning)
        ));
        batch.reset();
        assert!(batch.append(BatchAction::Test).is_ok());
        assert_eq!(batch.status(), &BatchStatus::Idle);
    }
}
