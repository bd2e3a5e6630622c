//! RAR 드라이버 (`rar`, 읽기 전용 `unrar`)

use super::{
    compression_flag, name_after, ArchiveBackend, ArchiveContext, BackendProperties, ExitPolicy,
    ProgressParser,
};
use crate::models::{
    AddRequest, ArchiveAction, Capabilities, CapturedOutput, ExtractRequest, FileEntry, ProcError,
    ProcErrorKind,
};
use crate::system::{OutputParser, OutputStream, ParseEvent, ProcessRunner, ToolLocator};
use chrono::{Local, NaiveDate, TimeZone};
use std::time::SystemTime;

const MIME_TYPES: &[&str] = &["application/x-rar", "application/x-cbr"];

/// 여러 볼륨에 걸친 레코드 표시 (앞 볼륨에서 이어진 조각)
const SPAN_MARKERS: &[&str] = &["<->", "<--", "<-"];

const PASSWORD_PHRASES: &[&str] = &[
    "password incorrect",
    "password is incorrect",
    "enter password",
    "wrong password",
    "crc failed in the encrypted file",
];

const UNSUPPORTED_PHRASES: &[&str] = &["unsupported archive format", "unknown method"];

pub struct RarBackend;

impl RarBackend {
    fn program(tools: &dyn ToolLocator) -> &'static str {
        if tools.tool_available_on_path("rar") {
            "rar"
        } else {
            "unrar"
        }
    }

    fn write_program(tools: &dyn ToolLocator) -> &'static str {
        if !tools.tool_available_on_path("rar") {
            log::warn!("rar: write requested but only unrar may be installed");
        }
        "rar"
    }

    /// `-hp<pw>` (헤더 암호화) 또는 `-p<pw>`, 암호가 없으면 질문 금지 `-p-`
    fn add_password_arg(ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner, disable_query: bool) {
        match ctx.password() {
            Some(password) if ctx.encrypt_header => runner.add_secret_arg("-hp", password),
            Some(password) => runner.add_secret_arg("-p", password),
            None if disable_query => runner.add_arg("-p-"),
            None => {}
        }
    }
}

impl ArchiveBackend for RarBackend {
    fn id(&self) -> &'static str {
        "rar"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        MIME_TYPES
    }

    fn capabilities(&self, mime_type: &str, tools: &dyn ToolLocator) -> Capabilities {
        if !MIME_TYPES.contains(&mime_type) {
            return Capabilities::NONE;
        }
        if tools.tool_available_on_path("rar") {
            Capabilities::READ_WRITE
                | Capabilities::ARCHIVE_MANY_FILES
                | Capabilities::ENCRYPT
                | Capabilities::ENCRYPT_HEADER
                | Capabilities::CREATE_VOLUMES
        } else if tools.tool_available_on_path("unrar") {
            Capabilities::READ
        } else {
            Capabilities::NONE
        }
    }

    fn packages(&self, mime_type: &str) -> Option<&'static str> {
        MIME_TYPES.contains(&mime_type).then_some("rar,unrar")
    }

    fn properties(&self) -> BackendProperties {
        BackendProperties {
            extract_can_avoid_overwrite: true,
            extract_can_skip_older: true,
            extract_can_junk_paths: true,
        }
    }

    fn list(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        runner.begin_command(Self::program(ctx.tools));
        runner.add_args(["v", "-c-"]);
        Self::add_password_arg(ctx, runner, true);
        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.set_parser(Box::new(RarListParser::new()));
        runner.end_command();
    }

    fn add(&self, ctx: &ArchiveContext<'_>, request: &AddRequest, runner: &mut ProcessRunner) {
        runner.begin_command(Self::write_program(ctx.tools));
        runner.set_working_dir(&request.base_dir);
        runner.add_arg(if request.update { "u" } else { "a" });
        if request.recursive {
            runner.add_arg("-r");
        }
        Self::add_password_arg(ctx, runner, false);
        runner.add_arg(compression_flag(ctx.compression, ["-m1", "-m2", "-m3", "-m5"]));
        if ctx.volume_size > 0 {
            runner.add_arg(format!("-v{}b", ctx.volume_size));
        }
        runner.add_arg("-y");
        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.add_args(request.files.iter().cloned());
        runner.set_parser(ProgressParser::boxed(
            &["Adding  ", "Updating  "],
            request.files.len(),
        ));
        runner.end_command();
    }

    fn delete(&self, ctx: &ArchiveContext<'_>, files: &[String], runner: &mut ProcessRunner) {
        runner.begin_command(Self::write_program(ctx.tools));
        runner.add_arg("d");
        Self::add_password_arg(ctx, runner, true);
        runner.add_arg("-y");
        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.add_args(files.iter().cloned());
        runner.set_parser(ProgressParser::boxed(&["Deleting  "], files.len()));
        runner.end_command();
    }

    fn extract(
        &self,
        ctx: &ArchiveContext<'_>,
        request: &ExtractRequest,
        total_files: usize,
        runner: &mut ProcessRunner,
    ) {
        runner.begin_command(Self::program(ctx.tools));
        runner.add_arg(if request.junk_paths { "e" } else { "x" });
        runner.add_arg(if request.overwrite { "-o+" } else { "-o-" });
        if request.skip_older {
            runner.add_arg("-u");
        }
        Self::add_password_arg(ctx, runner, true);
        runner.add_arg("-idp");
        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.add_args(request.files.iter().cloned());

        let mut destination = request.destination.to_string_lossy().into_owned();
        if !destination.ends_with('/') {
            destination.push('/');
        }
        runner.add_arg(destination);
        runner.set_parser(ProgressParser::boxed(&["Extracting  "], total_files));
        runner.end_command();
    }

    fn test(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        runner.begin_command(Self::program(ctx.tools));
        runner.add_arg("t");
        Self::add_password_arg(ctx, runner, true);
        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.set_parser(ProgressParser::boxed(&["Testing  "], 0));
        runner.end_command();
    }

    fn exit_policy(&self, action: ArchiveAction) -> ExitPolicy {
        if action.is_read_only() {
            ExitPolicy::WARNINGS_OK
        } else {
            ExitPolicy::STRICT
        }
    }

    fn handle_error(&self, action: ArchiveAction, error: &mut ProcError, output: &CapturedOutput) {
        if error.kind != ProcErrorKind::ExitedAbnormally {
            return;
        }
        if self.exit_policy(action).apply(error) {
            return;
        }

        for line in output.lines_rev() {
            let lower = line.to_lowercase();
            if PASSWORD_PHRASES.iter().any(|p| lower.contains(p)) {
                *error = ProcError::new(ProcErrorKind::AskPassword);
                return;
            }
            if line.contains("Cannot find volume") {
                let name = name_after(line, "Cannot find volume")
                    .unwrap_or_else(|| line.trim().to_string());
                *error = ProcError::missing_volume(name);
                return;
            }
            if UNSUPPORTED_PHRASES.iter().any(|p| lower.contains(p)) {
                *error = ProcError::new(ProcErrorKind::UnsupportedFormat);
                return;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    /// 구분선 전까지 건너뜀
    PreHeader,
    /// 파일 이름 라인 대기
    OddLine,
    /// 메타데이터 라인 대기
    EvenLine,
}

/// `rar v` 출력 파서
///
/// 구분선 사이에서 파일 이름 라인과 메타데이터 라인이 번갈아 나온다.
pub struct RarListParser {
    state: ListState,
    /// 이름 라인에서 읽은 (경로, 암호화 여부)
    pending: Option<(String, bool)>,
}

impl Default for RarListParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RarListParser {
    pub fn new() -> Self {
        Self {
            state: ListState::PreHeader,
            pending: None,
        }
    }

    fn parse_name_line(&mut self, line: &str) {
        let (name, encrypted) = match line.strip_prefix('*') {
            Some(rest) => (rest, true),
            None => (line.strip_prefix(' ').unwrap_or(line), false),
        };
        self.pending = Some((name.to_string(), encrypted));
    }

    fn parse_metadata_line(&mut self, line: &str, events: &mut Vec<ParseEvent>) {
        let Some((name, encrypted)) = self.pending.take() else {
            return;
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.iter().any(|t| SPAN_MARKERS.contains(t)) {
            log::debug!("rar: skipping volume-spanning record {}", name);
            return;
        }

        let size = tokens.first().and_then(|t| t.parse().ok()).unwrap_or(0);
        let date_index = tokens.iter().position(|t| parse_date(t).is_some());
        let modified = date_index.and_then(|i| {
            let date = parse_date(tokens[i])?;
            let (hour, minute) = tokens.get(i + 1).and_then(|t| parse_time(t)).unwrap_or((0, 0));
            let naive = date.and_hms_opt(hour, minute, 0)?;
            Local.from_local_datetime(&naive).earliest().map(SystemTime::from)
        });
        let is_directory = date_index
            .and_then(|i| tokens.get(i + 2))
            .map(|attr| is_directory_attribute(attr))
            .unwrap_or(false);

        let mut entry = FileEntry::from_archive_path(&name, is_directory);
        if !is_directory {
            entry.size = size;
        }
        if let Some(modified) = modified {
            entry.modified = modified;
        }
        entry.encrypted = encrypted;
        events.push(ParseEvent::Entry(entry));
    }
}

impl OutputParser for RarListParser {
    fn parse_line(&mut self, stream: OutputStream, line: &str, events: &mut Vec<ParseEvent>) {
        if stream != OutputStream::Stdout {
            return;
        }
        let is_separator = line.starts_with("--------");

        match self.state {
            ListState::PreHeader => {
                if is_separator {
                    self.state = ListState::OddLine;
                } else if line.starts_with("Volume ") {
                    events.push(ParseEvent::MultiVolume);
                }
            }
            ListState::OddLine => {
                if is_separator {
                    self.state = ListState::PreHeader;
                } else {
                    self.parse_name_line(line);
                    self.state = ListState::EvenLine;
                }
            }
            ListState::EvenLine => {
                if is_separator {
                    self.pending = None;
                    self.state = ListState::PreHeader;
                } else {
                    self.parse_metadata_line(line, events);
                    self.state = ListState::OddLine;
                }
            }
        }
    }
}

/// `dd-mm-yy` (연도는 2000년대)
fn parse_date(token: &str) -> Option<NaiveDate> {
    let mut parts = token.split('-');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let year = parts.next()?;
    if parts.next().is_some() || year.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// `HH:MM`
fn parse_time(token: &str) -> Option<(u32, u32)> {
    let (hour, minute) = token.split_once(':')?;
    let hour = hour.parse().ok().filter(|h| *h < 24)?;
    let minute = minute.parse().ok().filter(|m| *m < 60)?;
    Some((hour, minute))
}

/// 윈도우 속성 `.D.....` 또는 유닉스 권한 `drwxr-xr-x`
fn is_directory_attribute(attr: &str) -> bool {
    let mut chars = attr.chars();
    let first = chars.next();
    let second = chars.next();
    first == Some('d') || second == Some('D')
}
