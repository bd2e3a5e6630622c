//! 열린 압축 파일 세션
//!
//! `Closed → Opening → Open → {Open, Executing} → Closed` 상태 기계.
//! 작업 메서드는 바로 반환하고, 완료는 [`ArchiveSession::poll`]이 돌려주는
//! [`ActionOutcome`]과 [`ArchiveEvent::ActionDone`] 이벤트로 알린다.
//! 한 번에 하나의 작업만 진행되며, 진행 중에 다른 작업을 요청하면
//! [`BokslArcError::SessionBusy`]를 돌려준다.

use crate::core::backends::{scratch_dir, ArchiveBackend, ArchiveContext};
use crate::core::registry::BackendRegistry;
use crate::models::file_entry::{dir_list_from_path, normalize_full_path};
use crate::models::{
    ActionOutcome, AddRequest, ArchiveAction, Capabilities, CapturedOutput, ClipboardData,
    ClipboardOp, CompressionLevel, ExtractRequest, FileEntry, ProcError, ProcErrorKind,
    RenameParams, SaveAsParams,
};
use crate::system::mime::{self, strip_archive_extension};
use crate::system::{
    HostInterface, ParseEvent, ProcessObserver, ProcessOutcome, ProcessRunner, ToolLocator,
};
use crate::utils::config::Settings;
use crate::utils::error::{BokslArcError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    /// 목록 읽는 중
    Opening,
    Open,
    /// 추가/삭제/추출/검사 진행 중
    Executing,
}

/// 표시 계층으로 보내는 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveEvent {
    ActionStarted(ArchiveAction),
    /// None = 진행률 알 수 없음
    Progress(Option<f64>),
    Message(String),
    ActionDone(ArchiveAction, ProcError),
    StoppableChanged(bool),
}

/// 압축 파일 단위 옵션
#[derive(Debug, Clone, Default)]
struct ArchiveOptions {
    password: Option<String>,
    encrypt_header: bool,
    compression: CompressionLevel,
    volume_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// 요청한 작업 자체
    Main,
    /// 목록 읽기 (열기 또는 변경 후 다시 읽기)
    Listing,
}

/// 진행 중인 작업
struct InFlight {
    action: ArchiveAction,
    phase: Phase,
    /// 성공하면 목록을 다시 읽음
    reload_after: bool,
    entries: Vec<FileEntry>,
    multi_volume: bool,
    output: CapturedOutput,
    /// 중지되면 세션이 직접 지울 임시 디렉토리
    temp_dirs: Vec<PathBuf>,
}

impl InFlight {
    fn new(action: ArchiveAction, phase: Phase) -> Self {
        Self {
            action,
            phase,
            reload_after: false,
            entries: Vec::new(),
            multi_volume: false,
            output: CapturedOutput::default(),
            temp_dirs: Vec::new(),
        }
    }
}

/// 파서 이벤트를 세션 버퍼와 이벤트 채널로 전달
struct SessionObserver<'a> {
    events: Option<&'a Sender<ArchiveEvent>>,
    entries: &'a mut Vec<FileEntry>,
    multi_volume: &'a mut bool,
}

impl ProcessObserver for SessionObserver<'_> {
    fn parse_event(&mut self, event: ParseEvent) {
        match event {
            ParseEvent::Entry(entry) => self.entries.push(entry),
            ParseEvent::MultiVolume => *self.multi_volume = true,
            ParseEvent::Progress(fraction) => send(self.events, ArchiveEvent::Progress(Some(fraction))),
            ParseEvent::Message(message) => send(self.events, ArchiveEvent::Message(message)),
        }
    }
}

fn send(events: Option<&Sender<ArchiveEvent>>, event: ArchiveEvent) {
    if let Some(tx) = events {
        // 받는 쪽이 없어도 세션은 계속 동작
        let _ = tx.send(event);
    }
}

/// 열린 압축 파일 하나
pub struct ArchiveSession {
    registry: BackendRegistry,
    tools: Box<dyn ToolLocator>,
    runner: ProcessRunner,
    events: Option<Sender<ArchiveEvent>>,

    state: SessionState,
    path: Option<PathBuf>,
    mime_type: Option<&'static str>,
    backend_id: Option<&'static str>,
    read_only: bool,
    options: ArchiveOptions,
    force_directory_creation: bool,
    files: Vec<FileEntry>,
    multi_volume: bool,
    is_new: bool,
    stoppable: bool,

    in_flight: Option<InFlight>,
    /// 서브프로세스 없이 끝난 작업 결과
    pending_outcome: Option<ActionOutcome>,
}

impl ArchiveSession {
    pub fn new(registry: BackendRegistry, tools: Box<dyn ToolLocator>) -> Self {
        Self {
            registry,
            tools,
            runner: ProcessRunner::new(),
            events: None,
            state: SessionState::Closed,
            path: None,
            mime_type: None,
            backend_id: None,
            read_only: false,
            options: ArchiveOptions::default(),
            force_directory_creation: false,
            files: Vec::new(),
            multi_volume: false,
            is_new: false,
            stoppable: false,
            in_flight: None,
            pending_outcome: None,
        }
    }

    /// 설정 파일 값 적용
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.options.compression = settings.compression;
        self.options.encrypt_header = settings.encrypt_header;
        self.options.volume_size = settings.volume_size;
        self.force_directory_creation = settings.force_directory_creation;
    }

    /// 이벤트 수신자 등록
    pub fn subscribe(&mut self, tx: Sender<ArchiveEvent>) {
        self.events = Some(tx);
    }

    // ===== 상태 조회 =====

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, SessionState::Opening | SessionState::Executing)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mime_type(&self) -> Option<&'static str> {
        self.mime_type
    }

    pub fn backend_id(&self) -> Option<&'static str> {
        self.backend_id
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_multi_volume(&self) -> bool {
        self.multi_volume
    }

    pub fn is_stoppable(&self) -> bool {
        self.stoppable
    }

    pub fn password(&self) -> Option<&str> {
        self.options.password.as_deref()
    }

    pub fn set_password(&mut self, password: Option<String>) {
        self.options.password = password.filter(|p| !p.is_empty());
    }

    pub fn set_encrypt_header(&mut self, encrypt_header: bool) {
        self.options.encrypt_header = encrypt_header;
    }

    pub fn set_compression(&mut self, compression: CompressionLevel) {
        self.options.compression = compression;
    }

    pub fn set_volume_size(&mut self, volume_size: u64) {
        self.options.volume_size = volume_size;
    }

    pub fn set_force_directory_creation(&mut self, force: bool) {
        self.force_directory_creation = force;
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// 패키지 설치 후 도구 재확인
    pub fn refresh_backends(&mut self) {
        self.registry.refresh(self.tools.as_ref());
    }

    /// 지금까지 생성한 서브프로세스 수
    pub fn spawned_count(&self) -> usize {
        self.runner.spawned_count()
    }

    /// 현재 형식에 대한 능력 (분할 압축이면 쓰기 제외)
    pub fn capabilities(&self) -> Capabilities {
        let (Some(id), Some(mime_type)) = (self.backend_id, self.mime_type) else {
            return Capabilities::NONE;
        };
        let mut caps = self
            .registry
            .find(id)
            .map(|b| b.current(mime_type))
            .unwrap_or(Capabilities::NONE);
        if self.multi_volume {
            caps.remove(Capabilities::WRITE);
        }
        caps
    }

    // ===== 열기/닫기 =====

    /// 새 압축 파일 준비 (파일은 첫 추가 때 만들어짐)
    pub fn create(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.ensure_idle()?;
        let path = path.into();
        self.reset_archive();
        self.path = Some(path.clone());
        let action = ArchiveAction::CreatingNewArchive;

        let Some(mime_type) = mime::mime_type_from_path(&path) else {
            self.fail_now(action, ProcError::generic("Archive type not supported."));
            return Ok(());
        };
        let Some(backend_id) = self.resolve(mime_type, Capabilities::WRITE) else {
            let error = self.unsupported_error(mime_type, Capabilities::WRITE);
            self.fail_now(action, error);
            return Ok(());
        };

        self.mime_type = Some(mime_type);
        self.backend_id = Some(backend_id);
        self.is_new = true;
        self.read_only = false;
        self.state = SessionState::Open;
        log::info!("session: created {} ({})", path.display(), backend_id);
        self.complete_now(action);
        Ok(())
    }

    /// 압축 파일 열기. `password`가 None이면 현재 암호 유지
    pub fn load(&mut self, path: impl Into<PathBuf>, password: Option<String>) -> Result<()> {
        self.ensure_idle()?;
        let path = path.into();
        self.reset_archive();
        self.path = Some(path.clone());
        if password.is_some() {
            self.set_password(password);
        }
        let action = ArchiveAction::LoadingArchive;

        if !path.is_file() {
            self.fail_now(
                action,
                ProcError::generic(format!("File not found: {}", path.display())),
            );
            return Ok(());
        }

        let Some(mime_type) =
            mime::mime_type_from_path(&path).or_else(|| mime::mime_type_from_content(&path))
        else {
            self.fail_now(action, ProcError::generic("Archive type not supported."));
            return Ok(());
        };
        let Some(backend_id) = self.resolve(mime_type, Capabilities::READ) else {
            let error = self.unsupported_error(mime_type, Capabilities::READ);
            self.fail_now(action, error);
            return Ok(());
        };

        self.mime_type = Some(mime_type);
        self.backend_id = Some(backend_id);
        self.queue_list();
        self.begin(InFlight::new(action, Phase::Listing), true);
        Ok(())
    }

    /// 목록 다시 읽기
    pub fn reload(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.is_new && !self.path.as_deref().map(Path::exists).unwrap_or(false) {
            self.complete_now(ArchiveAction::ListingContent);
            return Ok(());
        }
        self.queue_list();
        self.begin(InFlight::new(ArchiveAction::ListingContent, Phase::Listing), true);
        Ok(())
    }

    /// 세션 닫기. 파일 목록, 암호, 분할 크기를 지움
    pub fn close(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.reset_archive();
        self.path = None;
        self.options.password = None;
        self.options.volume_size = 0;
        log::debug!("session: closed");
        Ok(())
    }

    // ===== 변경 작업 =====

    /// 로컬 파일 추가
    pub fn add(&mut self, request: AddRequest) -> Result<()> {
        self.ensure_writable()?;
        let action = ArchiveAction::AddingFiles;

        if !request.base_dir.is_dir() {
            self.fail_now(
                action,
                ProcError::generic(format!("Folder not found: {}", request.base_dir.display())),
            );
            return Ok(());
        }
        if request.files.is_empty() {
            self.complete_now(action);
            return Ok(());
        }

        let dest = relative_dir(&request.dest_dir);
        let mut inflight = InFlight::new(action, Phase::Main);
        inflight.reload_after = true;

        if dest.is_empty() {
            self.with_backend(|backend, ctx, runner| backend.add(ctx, &request, runner));
        } else {
            // 대상 디렉토리 구조를 임시 디렉토리에 만들어서 추가
            let work_dir = scratch_dir(&std::env::temp_dir(), "add");
            let staged = work_dir.join(&dest);
            self.runner.begin_command("mkdir");
            self.runner.add_arg("-p");
            self.runner.add_arg(staged.to_string_lossy());
            self.runner.end_command();

            self.runner.begin_command("cp");
            self.runner.set_working_dir(&request.base_dir);
            self.runner.add_args(["-a", "--parents", "--"]);
            self.runner.add_args(request.files.iter().cloned());
            self.runner.add_arg(format!("{}/", staged.to_string_lossy()));
            self.runner.end_command();

            let staged_request = AddRequest {
                files: request
                    .files
                    .iter()
                    .map(|f| format!("{}/{}", dest, f.trim_start_matches('/')))
                    .collect(),
                base_dir: work_dir.clone(),
                ..request
            };
            self.with_backend(|backend, ctx, runner| backend.add(ctx, &staged_request, runner));
            queue_cleanup(&mut self.runner, &work_dir);
            inflight.temp_dirs.push(work_dir);
        }

        self.begin(inflight, false);
        Ok(())
    }

    /// 항목 삭제 (디렉토리는 하위 항목까지)
    pub fn delete(&mut self, files: &[String]) -> Result<()> {
        self.ensure_writable()?;
        let action = ArchiveAction::DeletingFiles;
        let targets = self.delete_list(files);
        if targets.is_empty() {
            self.complete_now(action);
            return Ok(());
        }

        self.with_backend(|backend, ctx, runner| backend.delete(ctx, &targets, runner));
        let mut inflight = InFlight::new(action, Phase::Main);
        inflight.reload_after = true;
        self.begin(inflight, false);
        Ok(())
    }

    /// 파일 추출
    ///
    /// 순서: 암호 확인 → 대상 디렉토리 확인 → 덮어쓰기 확인. 앞의 두 단계에서
    /// 막히면 서브프로세스를 실행하지 않는다.
    pub fn extract(&mut self, request: ExtractRequest, host: &mut dyn HostInterface) -> Result<()> {
        self.ensure_open()?;
        let action = ArchiveAction::ExtractingFiles;
        let mut request = request;

        let mut targets = self.target_indices(&request.files);
        if self.needs_password(&targets) {
            self.fail_now(action, ProcError::new(ProcErrorKind::AskPassword));
            return Ok(());
        }

        let props = self
            .current_backend()
            .map(|backend| backend.properties())
            .unwrap_or_default();
        if request.junk_paths && !props.extract_can_junk_paths {
            self.fail_now(
                action,
                ProcError::generic("This archive type cannot extract files without their folders."),
            );
            return Ok(());
        }

        if let Err(error) = self.prepare_destination(&request.destination, host) {
            self.fail_now(action, error);
            return Ok(());
        }

        let base_dir = request
            .base_dir
            .as_deref()
            .map(|b| normalize_full_path(b, true))
            .filter(|b| b != "/");
        // 임시 디렉토리를 거치면 드라이버의 덮어쓰기/날짜 옵션이 소용없음
        let staged = base_dir.is_some() && !request.junk_paths;

        let ask_overwrite = !request.overwrite && (staged || !props.extract_can_avoid_overwrite);
        let keep_newer = request.skip_older && (staged || !props.extract_can_skip_older);
        if ask_overwrite || keep_newer {
            let mut dropped = BTreeSet::new();
            let mut any_existing = false;
            for &index in &targets {
                let entry = &self.files[index];
                if entry.is_directory {
                    continue;
                }
                let target = request.destination.join(local_relative_path(
                    entry,
                    base_dir.as_deref(),
                    request.junk_paths,
                ));
                let Ok(metadata) = fs::metadata(&target) else {
                    continue;
                };
                any_existing = true;
                if keep_newer {
                    let newer = metadata
                        .modified()
                        .map(|local| local > entry.modified)
                        .unwrap_or(false);
                    if newer {
                        dropped.insert(index);
                        continue;
                    }
                }
                if ask_overwrite && !host.confirm_overwrite(&target) {
                    dropped.insert(index);
                }
            }
            if any_existing && ask_overwrite {
                request.overwrite = true;
            }
            if !dropped.is_empty() {
                targets.retain(|i| !dropped.contains(i) && !self.files[*i].is_directory);
                if targets.is_empty() {
                    log::info!("session: every file was skipped, nothing to extract");
                    self.complete_now(action);
                    return Ok(());
                }
                request.files = targets
                    .iter()
                    .map(|&i| self.files[i].original_path.clone())
                    .collect();
            }
        }

        let explicit = !request.files.is_empty();
        let total_files = targets
            .iter()
            .filter(|&&i| !self.files[i].is_directory)
            .count();
        if explicit {
            request.files = self.extract_arguments(&request.files);
        }

        let mut inflight = InFlight::new(action, Phase::Main);
        match base_dir {
            Some(base) if !request.junk_paths => {
                // 임시 디렉토리에 풀고 기준 디렉토리 아래 항목만 대상으로 복사
                let rel_base = relative_dir(&base);
                let work_dir = scratch_dir(&std::env::temp_dir(), "extract");
                let tops = top_components(
                    targets.iter().map(|&i| self.files[i].full_path.as_str()),
                    &base,
                );

                self.runner.begin_command("mkdir");
                self.runner.add_arg("-p");
                self.runner.add_arg(work_dir.to_string_lossy());
                self.runner.end_command();

                let temp_request = ExtractRequest {
                    destination: work_dir.clone(),
                    ..request.clone()
                };
                self.with_backend(|backend, ctx, runner| {
                    backend.extract(ctx, &temp_request, total_files, runner)
                });

                if !tops.is_empty() {
                    let source_root = work_dir.join(&rel_base);
                    self.runner.begin_command("cp");
                    self.runner.add_args(["-a", "-f", "--"]);
                    for top in &tops {
                        self.runner.add_arg(source_root.join(top).to_string_lossy());
                    }
                    self.runner
                        .add_arg(format!("{}/", request.destination.to_string_lossy()));
                    self.runner.end_command();
                }
                queue_cleanup(&mut self.runner, &work_dir);
                inflight.temp_dirs.push(work_dir);
            }
            _ => {
                self.with_backend(|backend, ctx, runner| {
                    backend.extract(ctx, &request, total_files, runner)
                });
            }
        }

        self.begin(inflight, true);
        Ok(())
    }

    /// 압축 파일 옆에 이름을 딴 새 폴더로 전체 추출
    pub fn extract_here(
        &mut self,
        skip_older: bool,
        overwrite: bool,
        junk_paths: bool,
        host: &mut dyn HostInterface,
    ) -> Result<()> {
        self.ensure_open()?;
        let Some(path) = self.path.clone() else {
            return Err(BokslArcError::SessionNotOpen);
        };
        let destination = unique_extract_dir(&path);
        let mut request = ExtractRequest::new(Vec::new(), destination);
        request.skip_older = skip_older;
        request.overwrite = overwrite;
        request.junk_paths = junk_paths;

        // 새로 만드는 폴더이므로 확인 없이 생성
        let force = mem::replace(&mut self.force_directory_creation, true);
        let result = self.extract(request, host);
        self.force_directory_creation = force;
        result
    }

    /// 무결성 검사
    pub fn test(&mut self) -> Result<()> {
        self.ensure_open()?;
        let action = ArchiveAction::TestingArchive;
        let all = self.target_indices(&[]);
        if self.needs_password(&all) {
            self.fail_now(action, ProcError::new(ProcErrorKind::AskPassword));
            return Ok(());
        }
        self.with_backend(|backend, ctx, runner| backend.test(ctx, runner));
        self.begin(InFlight::new(action, Phase::Main), true);
        Ok(())
    }

    /// 이름 변경: 임시 디렉토리로 추출 → 삭제 → 이름 변경 → 다시 추가
    pub fn rename(&mut self, params: RenameParams) -> Result<()> {
        self.ensure_writable()?;
        let action = ArchiveAction::RenamingFiles;
        if params.new_name.is_empty() || params.new_name.contains('/') {
            self.fail_now(
                action,
                ProcError::generic(format!("Invalid name: {}", params.new_name)),
            );
            return Ok(());
        }

        let originals = if params.is_dir {
            dir_list_from_path(&self.files, &params.path_to_rename)
        } else {
            self.delete_list(std::slice::from_ref(&params.path_to_rename))
        };
        if originals.is_empty() {
            self.fail_now(
                action,
                ProcError::generic(format!("File not found: {}", params.path_to_rename)),
            );
            return Ok(());
        }
        let targets = self.target_indices(std::slice::from_ref(&params.path_to_rename));
        if self.needs_password(&targets) {
            self.fail_now(action, ProcError::new(ProcErrorKind::AskPassword));
            return Ok(());
        }

        let work_dir = scratch_dir(&std::env::temp_dir(), "rename");
        let current = relative_dir(&params.current_dir);
        let parent = if current.is_empty() {
            work_dir.clone()
        } else {
            work_dir.join(&current)
        };
        let new_relative = if current.is_empty() {
            params.new_name.clone()
        } else {
            format!("{}/{}", current, params.new_name)
        };
        let extract_files: Vec<String> = originals
            .iter()
            .filter(|p| !p.ends_with('/'))
            .cloned()
            .collect();

        self.runner.begin_command("mkdir");
        self.runner.add_arg("-p");
        self.runner.add_arg(work_dir.to_string_lossy());
        self.runner.end_command();

        let extract_request = ExtractRequest::new(extract_files, work_dir.clone());
        let add_request = AddRequest::new(vec![new_relative], work_dir.clone());
        let total = targets.len();
        self.with_backend(|backend, ctx, runner| {
            backend.extract(ctx, &extract_request, total, runner);
            backend.delete(ctx, &originals, runner);
        });

        if params.is_dir {
            // 빈 디렉토리는 추출되지 않으므로 먼저 만들어 둠
            self.runner.begin_command("mkdir");
            self.runner.add_arg("-p");
            self.runner
                .add_arg(parent.join(&params.old_name).to_string_lossy());
            self.runner.end_command();
        }

        self.runner.begin_command("mv");
        self.runner.add_args(["-f", "--"]);
        self.runner
            .add_arg(parent.join(&params.old_name).to_string_lossy());
        self.runner
            .add_arg(parent.join(&params.new_name).to_string_lossy());
        self.runner.end_command();

        self.with_backend(|backend, ctx, runner| backend.add(ctx, &add_request, runner));
        queue_cleanup(&mut self.runner, &work_dir);

        let mut inflight = InFlight::new(action, Phase::Main);
        inflight.reload_after = true;
        inflight.temp_dirs.push(work_dir);
        self.begin(inflight, false);
        Ok(())
    }

    /// 다른 압축 파일의 항목을 현재 디렉토리에 붙여넣기
    pub fn paste(&mut self, data: ClipboardData) -> Result<()> {
        self.ensure_writable()?;
        let action = ArchiveAction::PastingFiles;
        if data.files.is_empty() {
            self.complete_now(action);
            return Ok(());
        }

        let Some(source_mime) = mime::mime_type_from_path(&data.archive_path)
            .or_else(|| mime::mime_type_from_content(&data.archive_path))
        else {
            self.fail_now(action, ProcError::generic("Archive type not supported."));
            return Ok(());
        };
        let required = match data.op {
            ClipboardOp::Copy => Capabilities::READ,
            ClipboardOp::Cut => Capabilities::READ_WRITE,
        };
        let Some(source_id) = self.resolve(source_mime, required) else {
            let error = self.unsupported_error(source_mime, required);
            self.fail_now(action, error);
            return Ok(());
        };

        let base = normalize_full_path(&data.base_dir, true);
        let rel_base = relative_dir(&base);
        let current = relative_dir(&data.current_dir);
        let work_dir = scratch_dir(&std::env::temp_dir(), "paste");
        let unpacked = work_dir.join("unpacked");
        let staged_root = work_dir.join("staged");
        let staged = if current.is_empty() {
            staged_root.clone()
        } else {
            staged_root.join(&current)
        };
        let tops = top_components(
            data.files
                .iter()
                .map(|f| normalize_full_path(f, f.ends_with('/')))
                .collect::<Vec<_>>()
                .iter()
                .map(String::as_str),
            &base,
        );
        if tops.is_empty() {
            self.fail_now(
                action,
                ProcError::generic("Nothing to paste from the clipboard."),
            );
            return Ok(());
        }

        self.runner.begin_command("mkdir");
        self.runner.add_arg("-p");
        self.runner.add_arg(unpacked.to_string_lossy());
        self.runner.add_arg(staged.to_string_lossy());
        self.runner.end_command();

        let source_files: Vec<String> = data
            .files
            .iter()
            .filter(|f| !f.ends_with('/'))
            .cloned()
            .collect();
        let source_extract = ExtractRequest::new(source_files, unpacked.clone());
        let source_password = data.archive_password.as_deref().filter(|p| !p.is_empty());
        if let Some(source) = self.registry.find(source_id) {
            let ctx = ArchiveContext {
                path: &data.archive_path,
                mime_type: source_mime,
                password: source_password,
                encrypt_header: false,
                compression: self.options.compression,
                volume_size: 0,
                tools: self.tools.as_ref(),
            };
            source
                .backend()
                .extract(&ctx, &source_extract, data.files.len(), &mut self.runner);
        }

        self.runner.begin_command("mv");
        self.runner.add_args(["-f", "--"]);
        let source_root = if rel_base.is_empty() {
            unpacked.clone()
        } else {
            unpacked.join(&rel_base)
        };
        for top in &tops {
            self.runner.add_arg(source_root.join(top).to_string_lossy());
        }
        self.runner.add_arg(format!("{}/", staged.to_string_lossy()));
        self.runner.end_command();

        let add_files: Vec<String> = tops
            .iter()
            .map(|top| {
                if current.is_empty() {
                    top.clone()
                } else {
                    format!("{}/{}", current, top)
                }
            })
            .collect();
        let add_request = AddRequest::new(add_files, staged_root);
        self.with_backend(|backend, ctx, runner| backend.add(ctx, &add_request, runner));

        // 잘라내기는 붙여넣기가 끝난 뒤 원본에서 삭제
        if data.op == ClipboardOp::Cut {
            if let Some(source) = self.registry.find(source_id) {
                let ctx = ArchiveContext {
                    path: &data.archive_path,
                    mime_type: source_mime,
                    password: source_password,
                    encrypt_header: false,
                    compression: self.options.compression,
                    volume_size: 0,
                    tools: self.tools.as_ref(),
                };
                source.backend().delete(&ctx, &data.files, &mut self.runner);
            }
        }
        queue_cleanup(&mut self.runner, &work_dir);

        let mut inflight = InFlight::new(action, Phase::Main);
        inflight.reload_after = true;
        inflight.temp_dirs.push(work_dir);
        self.begin(inflight, false);
        Ok(())
    }

    /// 다른 이름/형식으로 저장 (현재 세션은 원래 압축 파일 유지)
    pub fn save_as(&mut self, params: SaveAsParams) -> Result<()> {
        self.ensure_open()?;
        let action = ArchiveAction::SavingAs;

        if self.path.as_deref() == Some(params.path.as_path()) {
            self.fail_now(
                action,
                ProcError::generic("The archive cannot be saved over itself."),
            );
            return Ok(());
        }
        let all = self.target_indices(&[]);
        if self.needs_password(&all) {
            self.fail_now(action, ProcError::new(ProcErrorKind::AskPassword));
            return Ok(());
        }
        let Some(target_mime) = mime::mime_type_from_path(&params.path) else {
            self.fail_now(action, ProcError::generic("Archive type not supported."));
            return Ok(());
        };
        let Some(target_id) = self.resolve(target_mime, Capabilities::WRITE) else {
            let error = self.unsupported_error(target_mime, Capabilities::WRITE);
            self.fail_now(action, error);
            return Ok(());
        };

        let tops = top_components(self.files.iter().map(|e| e.full_path.as_str()), "/");
        // 새 압축 파일을 대상 옆 임시 디렉토리에 만든 뒤 성공하면 옮김
        let target_parent = params
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let work_dir = scratch_dir(target_parent, "save");
        let unpacked = work_dir.join("files");
        let split = params.volume_size > 0;
        let written = match params.path.file_name() {
            // 분할 압축은 볼륨 이름이 여러 개라 대상 경로에 바로 씀
            Some(name) if !split => work_dir.join(name),
            _ => params.path.clone(),
        };

        self.runner.begin_command("mkdir");
        self.runner.add_arg("-p");
        self.runner.add_arg(unpacked.to_string_lossy());
        self.runner.end_command();

        let extract_request = ExtractRequest::new(Vec::new(), unpacked.clone());
        let total = all.len();
        let queued = self.with_backend(|backend, ctx, runner| {
            backend.extract(ctx, &extract_request, total, runner)
        });
        let target = self.registry.find(target_id);
        let (true, Some(target)) = (queued, target) else {
            self.runner.clear();
            self.fail_now(action, ProcError::generic("Archive type not supported."));
            return Ok(());
        };

        if written == params.path && params.path.exists() {
            self.runner.begin_command("rm");
            self.runner.add_args(["-f", "--"]);
            self.runner.add_arg(params.path.to_string_lossy());
            self.runner.end_command();
        }

        let ctx = ArchiveContext {
            path: &written,
            mime_type: target_mime,
            password: params.password.as_deref().filter(|p| !p.is_empty()),
            encrypt_header: params.encrypt_header,
            compression: self.options.compression,
            volume_size: params.volume_size,
            tools: self.tools.as_ref(),
        };
        let add_request = AddRequest::new(tops, unpacked);
        target.backend().add(&ctx, &add_request, &mut self.runner);

        if written != params.path {
            self.runner.begin_command("mv");
            self.runner.add_args(["-f", "--"]);
            self.runner.add_arg(written.to_string_lossy());
            self.runner.add_arg(params.path.to_string_lossy());
            self.runner.end_command();
        }
        queue_cleanup(&mut self.runner, &work_dir);

        let mut inflight = InFlight::new(action, Phase::Main);
        inflight.temp_dirs.push(work_dir);
        self.begin(inflight, false);
        Ok(())
    }

    /// 진행 중인 작업 중지 (중지 가능한 작업일 때만). 중지했으면 true
    pub fn stop(&mut self) -> bool {
        if !self.stoppable || !self.runner.is_running() {
            return false;
        }
        log::info!("session: stop requested");
        self.runner.stop();
        true
    }

    // ===== 완료 처리 =====

    /// 진행 중인 작업 처리. 끝나면 결과 반환
    pub fn poll(&mut self) -> Option<ActionOutcome> {
        if let Some(outcome) = self.pending_outcome.take() {
            return Some(outcome);
        }

        let inflight = self.in_flight.as_mut()?;
        let mut observer = SessionObserver {
            events: self.events.as_ref(),
            entries: &mut inflight.entries,
            multi_volume: &mut inflight.multi_volume,
        };
        let ProcessOutcome { mut error, output } = self.runner.poll(&mut observer)?;
        let mut inflight = self.in_flight.take()?;

        let phase_action = match inflight.phase {
            Phase::Listing if inflight.action == ArchiveAction::LoadingArchive => {
                ArchiveAction::LoadingArchive
            }
            Phase::Listing => ArchiveAction::ListingContent,
            Phase::Main => inflight.action,
        };
        if let Some(backend) = self.current_backend() {
            backend.handle_error(phase_action, &mut error, &output);
        }
        inflight.output.append(output);

        if error.kind == ProcErrorKind::Stopped {
            for dir in &inflight.temp_dirs {
                if let Err(e) = fs::remove_dir_all(dir) {
                    log::debug!("session: could not remove {}: {}", dir.display(), e);
                }
            }
        }

        match inflight.phase {
            Phase::Main if !error.is_error() && inflight.reload_after => {
                // 변경이 끝났으면 목록을 다시 읽은 뒤 완료를 알림
                inflight.phase = Phase::Listing;
                inflight.entries.clear();
                inflight.multi_volume = false;
                self.queue_list();
                self.runner.start();
                self.emit(ArchiveEvent::Progress(None));
                self.in_flight = Some(inflight);
                None
            }
            Phase::Main => {
                self.state = SessionState::Open;
                Some(self.finish(inflight, error))
            }
            Phase::Listing => {
                if !error.is_error() {
                    self.files = mem::take(&mut inflight.entries);
                    self.multi_volume = inflight.multi_volume;
                    self.is_new = false;
                    self.read_only = !self.capabilities().contains(Capabilities::WRITE);
                    self.state = SessionState::Open;
                } else if inflight.action == ArchiveAction::LoadingArchive {
                    // 경로는 다시 시도할 수 있게 남겨 둠
                    self.files.clear();
                    self.state = SessionState::Closed;
                } else {
                    self.state = SessionState::Open;
                }
                Some(self.finish(inflight, error))
            }
        }
    }

    /// 진행 중인 작업이 끝날 때까지 대기 (CLI, 테스트용)
    pub fn wait(&mut self) -> Option<ActionOutcome> {
        if self.pending_outcome.is_none() && self.in_flight.is_none() {
            return None;
        }
        loop {
            if let Some(outcome) = self.poll() {
                return Some(outcome);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    // ===== 내부 도우미 =====

    fn ensure_idle(&self) -> Result<()> {
        if self.is_busy() || self.pending_outcome.is_some() {
            return Err(BokslArcError::SessionBusy);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        self.ensure_idle()?;
        if self.state != SessionState::Open {
            return Err(BokslArcError::SessionNotOpen);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(BokslArcError::ReadOnlyArchive {
                path: self.path.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn resolve(&self, mime_type: &str, required: Capabilities) -> Option<&'static str> {
        self.registry.resolve(mime_type, required).map(|b| b.id())
    }

    /// 지원 도구가 없을 때의 오류 (설치로 해결 가능하면 UnsupportedFormat)
    fn unsupported_error(&self, mime_type: &str, required: Capabilities) -> ProcError {
        if self.registry.resolve_potential(mime_type, required).is_some() {
            log::warn!("session: {} needs additional packages", mime_type);
            ProcError::with_details(ProcErrorKind::UnsupportedFormat, mime_type)
        } else {
            log::warn!("session: no backend for {}", mime_type);
            ProcError::generic("Archive type not supported.")
        }
    }

    fn current_backend(&self) -> Option<&dyn ArchiveBackend> {
        self.backend_id
            .and_then(|id| self.registry.find(id))
            .map(|b| b.backend())
    }

    /// 현재 압축 파일 드라이버로 명령 큐 작성
    fn with_backend<F>(&mut self, build: F) -> bool
    where
        F: FnOnce(&dyn ArchiveBackend, &ArchiveContext<'_>, &mut ProcessRunner),
    {
        let (Some(path), Some(mime_type), Some(id)) =
            (self.path.as_deref(), self.mime_type, self.backend_id)
        else {
            return false;
        };
        let Some(registered) = self.registry.find(id) else {
            return false;
        };
        let ctx = ArchiveContext {
            path,
            mime_type,
            password: self.options.password.as_deref(),
            encrypt_header: self.options.encrypt_header,
            compression: self.options.compression,
            volume_size: self.options.volume_size,
            tools: self.tools.as_ref(),
        };
        build(registered.backend(), &ctx, &mut self.runner);
        true
    }

    fn queue_list(&mut self) {
        self.with_backend(|backend, ctx, runner| backend.list(ctx, runner));
    }

    fn reset_archive(&mut self) {
        self.runner.clear();
        self.state = SessionState::Closed;
        self.mime_type = None;
        self.backend_id = None;
        self.read_only = false;
        self.files.clear();
        self.multi_volume = false;
        self.is_new = false;
    }

    fn emit(&self, event: ArchiveEvent) {
        send(self.events.as_ref(), event);
    }

    fn set_stoppable(&mut self, stoppable: bool) {
        if self.stoppable != stoppable {
            self.stoppable = stoppable;
            self.emit(ArchiveEvent::StoppableChanged(stoppable));
        }
    }

    /// 큐에 쌓은 명령 실행 시작
    fn begin(&mut self, inflight: InFlight, stoppable: bool) {
        log::info!("session: {} started", inflight.action.name());
        self.state = if inflight.action == ArchiveAction::LoadingArchive {
            SessionState::Opening
        } else {
            SessionState::Executing
        };
        self.emit(ArchiveEvent::ActionStarted(inflight.action));
        self.emit(ArchiveEvent::Progress(None));
        self.set_stoppable(stoppable);
        self.in_flight = Some(inflight);
        self.runner.start();
    }

    fn finish(&mut self, inflight: InFlight, error: ProcError) -> ActionOutcome {
        self.set_stoppable(false);
        if error.is_error() {
            log::warn!("session: {} failed: {}", inflight.action.name(), error);
        } else {
            log::info!("session: {} finished", inflight.action.name());
        }
        self.emit(ArchiveEvent::ActionDone(inflight.action, error.clone()));
        ActionOutcome {
            action: inflight.action,
            error,
            output: inflight.output,
        }
    }

    /// 서브프로세스 없이 실패
    fn fail_now(&mut self, action: ArchiveAction, error: ProcError) {
        log::warn!("session: {} not started: {}", action.name(), error);
        self.emit(ArchiveEvent::ActionStarted(action));
        self.emit(ArchiveEvent::ActionDone(action, error.clone()));
        self.pending_outcome = Some(ActionOutcome::failure(action, error));
    }

    /// 서브프로세스 없이 성공
    fn complete_now(&mut self, action: ArchiveAction) {
        self.emit(ArchiveEvent::ActionStarted(action));
        self.emit(ArchiveEvent::ActionDone(action, ProcError::none()));
        self.pending_outcome = Some(ActionOutcome::success(action));
    }

    /// 요청 경로에 해당하는 엔트리 위치 (비어 있으면 전체, 디렉토리는 하위 포함)
    fn target_indices(&self, files: &[String]) -> Vec<usize> {
        if files.is_empty() {
            return (0..self.files.len()).collect();
        }
        let mut indices = BTreeSet::new();
        for requested in files {
            let as_file = normalize_full_path(requested, false);
            let as_dir = normalize_full_path(requested, true);
            for (i, entry) in self.files.iter().enumerate() {
                if entry.full_path == as_file
                    || entry.full_path == as_dir
                    || entry.original_path == *requested
                    || entry.is_descendant_of(&as_dir)
                {
                    indices.insert(i);
                }
            }
        }
        indices.into_iter().collect()
    }

    /// 대상 엔트리 중 하나라도 암호화되어 있고 암호가 없는지
    fn needs_password(&self, indices: &[usize]) -> bool {
        self.options.password.is_none() && indices.iter().any(|&i| self.files[i].encrypted)
    }

    /// 삭제 인자 (디렉토리는 하위 항목까지, 목록에 없는 경로는 그대로)
    fn delete_list(&self, files: &[String]) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut result = Vec::new();
        for requested in files {
            let indices = self.target_indices(std::slice::from_ref(requested));
            if indices.is_empty() {
                let raw = requested.trim_start_matches('/').to_string();
                if seen.insert(raw.clone()) {
                    result.push(raw);
                }
                continue;
            }
            for i in indices {
                let original = self.files[i].original_path.clone();
                if seen.insert(original.clone()) {
                    result.push(original);
                }
            }
        }
        result
    }

    /// 추출 인자 (파일과 빈 디렉토리)
    fn extract_arguments(&self, files: &[String]) -> Vec<String> {
        let indices = self.target_indices(files);
        indices
            .iter()
            .map(|&i| &self.files[i])
            .filter(|entry| {
                !entry.is_directory
                    || !self
                        .files
                        .iter()
                        .any(|other| other.is_descendant_of(&entry.full_path))
            })
            .map(|entry| entry.original_path.clone())
            .collect()
    }

    /// 추출 대상 디렉토리 준비 (없으면 확인 후 생성, 쓰기 가능 확인)
    fn prepare_destination(
        &self,
        destination: &Path,
        host: &mut dyn HostInterface,
    ) -> std::result::Result<(), ProcError> {
        if !destination.exists() {
            if !self.force_directory_creation && !host.confirm_create_directory(destination) {
                return Err(ProcError::generic("Extraction not performed"));
            }
            fs::create_dir_all(destination).map_err(|e| {
                ProcError::generic(format!(
                    "Could not create the destination folder: {}",
                    e
                ))
            })?;
        }
        if !destination.is_dir() {
            return Err(ProcError::generic(format!(
                "Destination is not a folder: {}",
                destination.display()
            )));
        }
        if tempfile::tempfile_in(destination).is_err() {
            return Err(ProcError::generic(format!(
                "You don't have the right permissions to extract archives in the folder \"{}\"",
                destination.display()
            )));
        }
        Ok(())
    }
}

/// 정리 단계: 앞 단계 결과와 관계없이 임시 디렉토리 삭제
fn queue_cleanup(runner: &mut ProcessRunner, dir: &Path) {
    runner.begin_command("rm");
    runner.add_arg("-rf");
    runner.add_arg(dir.to_string_lossy());
    runner.set_sticky(true);
    runner.end_command();
}

/// `/a/b/` → `a/b`, `/` → 빈 문자열
fn relative_dir(dir: &str) -> String {
    normalize_full_path(dir, true)
        .trim_matches('/')
        .to_string()
}

/// 기준 디렉토리 아래 경로들의 첫 번째 구성 요소 (중복 제거, 순서 유지)
fn top_components<'a>(paths: impl Iterator<Item = &'a str>, base: &str) -> Vec<String> {
    let base = normalize_full_path(base, true);
    let mut seen = BTreeSet::new();
    let mut tops = Vec::new();
    for path in paths {
        let Some(rest) = path.strip_prefix(base.as_str()) else {
            continue;
        };
        let Some(top) = rest.split('/').next().filter(|t| !t.is_empty()) else {
            continue;
        };
        if seen.insert(top.to_string()) {
            tops.push(top.to_string());
        }
    }
    tops
}

/// 추출 후 로컬에 놓일 상대 경로
fn local_relative_path(entry: &FileEntry, base_dir: Option<&str>, junk_paths: bool) -> PathBuf {
    if junk_paths {
        return PathBuf::from(&entry.name);
    }
    let full = entry.full_path.as_str();
    let relative = base_dir
        .and_then(|base| full.strip_prefix(base))
        .unwrap_or(full)
        .trim_start_matches('/');
    PathBuf::from(relative)
}

/// `photos.tar.gz` → `photos`, 이미 있으면 `photos (1)`, `photos (2)`, ...
pub fn unique_extract_dir(archive: &Path) -> PathBuf {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut stem = strip_archive_extension(&file_name).to_string();
    if stem.is_empty() || stem == file_name {
        stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
    }

    let first = parent.join(&stem);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|n| parent.join(format!("{} ({})", stem, n)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_dir() {
        assert_eq!(relative_dir("/"), "");
        assert_eq!(relative_dir("/docs/sub/"), "docs/sub");
        assert_eq!(relative_dir("docs"), "docs");
    }

    #[test]
    fn test_top_components_under_base() {
        let paths = ["/src/a.txt", "/src/lib/b.rs", "/src/lib/", "/other/c.txt"];
        assert_eq!(
            top_components(paths.iter().copied(), "/src/"),
            vec!["a.txt".to_string(), "lib".to_string()]
        );
        assert_eq!(
            top_components(paths.iter().copied(), "/"),
            vec!["src".to_string(), "other".to_string()]
        );
    }

    #[test]
    fn test_local_relative_path() {
        let entry = FileEntry::from_archive_path("docs/sub/a.txt", false);
        assert_eq!(
            local_relative_path(&entry, None, false),
            PathBuf::from("docs/sub/a.txt")
        );
        assert_eq!(
            local_relative_path(&entry, Some("/docs/"), false),
            PathBuf::from("sub/a.txt")
        );
        assert_eq!(
            local_relative_path(&entry, None, true),
            PathBuf::from("a.txt")
        );
    }

    #[test]
    fn test_unique_extract_dir() {
        let temp = tempfile::tempdir().expect("create tempdir");
        let archive = temp.path().join("photos.tar.gz");
        assert_eq!(unique_extract_dir(&archive), temp.path().join("photos"));

        fs::create_dir(temp.path().join("photos")).expect("create dir");
        assert_eq!(unique_extract_dir(&archive), temp.path().join("photos (1)"));

        fs::create_dir(temp.path().join("photos (1)")).expect("create dir");
        assert_eq!(unique_extract_dir(&archive), temp.path().join("photos (2)"));

        let plain = temp.path().join("notes.bin");
        assert_eq!(unique_extract_dir(&plain), temp.path().join("notes"));
    }
}
