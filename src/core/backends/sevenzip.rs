//! 7-Zip 계열 드라이버 (`7z`, `7za`, `7zr`)

use super::{
    compression_flag, name_after, ArchiveBackend, ArchiveContext, BackendProperties, ExitPolicy,
    ProgressParser,
};
use crate::models::{
    AddRequest, ArchiveAction, Capabilities, CapturedOutput, ExtractRequest, FileEntry, ProcError,
    ProcErrorKind,
};
use crate::system::{OutputParser, OutputStream, ParseEvent, ProcessRunner, ToolLocator};
use chrono::{Local, NaiveDateTime, TimeZone};
use std::time::SystemTime;

const PROGRAMS: &[&str] = &["7z", "7za", "7zr"];

const MIME_TYPES: &[&str] = &[
    "application/x-7z-compressed",
    "application/zip",
    "application/x-java-archive",
    "application/x-cbz",
    "application/x-ear",
    "application/x-war",
    "application/x-rar",
    "application/x-cbr",
    "application/x-arj",
    "application/vnd.ms-cab-compressed",
    "application/x-cd-image",
    "application/x-deb",
    "application/x-rpm",
];

/// 이 버전 미만은 "Listing archive:" 라인에서 목록이 시작됨
const NEW_LISTING_VERSION: (u32, u32) = (4, 55);

pub struct SevenZipBackend;

impl SevenZipBackend {
    fn program(tools: &dyn ToolLocator) -> &'static str {
        tools.first_available(PROGRAMS).unwrap_or(PROGRAMS[0])
    }

    fn add_password_arg(ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner, always: bool) {
        match ctx.password() {
            Some(password) => runner.add_secret_arg("-p", password),
            None if always => runner.add_arg("-p"),
            None => {}
        }
    }
}

impl ArchiveBackend for SevenZipBackend {
    fn id(&self) -> &'static str {
        "7z"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        MIME_TYPES
    }

    fn capabilities(&self, mime_type: &str, tools: &dyn ToolLocator) -> Capabilities {
        let Some(program) = tools.first_available(PROGRAMS) else {
            return Capabilities::NONE;
        };
        let full = Capabilities::READ_WRITE | Capabilities::ARCHIVE_MANY_FILES;

        match mime_type {
            "application/x-7z-compressed" => {
                full | Capabilities::ENCRYPT
                    | Capabilities::ENCRYPT_HEADER
                    | Capabilities::CREATE_VOLUMES
            }
            // 7zr은 7z 형식만 지원
            "application/zip"
            | "application/x-java-archive"
            | "application/x-cbz"
            | "application/x-ear"
            | "application/x-war"
                if program != "7zr" =>
            {
                full | Capabilities::ENCRYPT | Capabilities::CREATE_VOLUMES
            }
            "application/x-rar"
            | "application/x-cbr"
            | "application/x-arj"
            | "application/vnd.ms-cab-compressed"
            | "application/x-cd-image"
            | "application/x-deb"
            | "application/x-rpm"
                if tools.tool_available_on_path("7z") =>
            {
                Capabilities::READ
            }
            _ => Capabilities::NONE,
        }
    }

    fn packages(&self, mime_type: &str) -> Option<&'static str> {
        match mime_type {
            "application/x-rar" | "application/x-cbr" => Some("p7zip,p7zip-full,p7zip-rar"),
            m if MIME_TYPES.contains(&m) => Some("p7zip,p7zip-full"),
            _ => None,
        }
    }

    fn properties(&self) -> BackendProperties {
        BackendProperties {
            extract_can_avoid_overwrite: true,
            extract_can_skip_older: false,
            extract_can_junk_paths: true,
        }
    }

    fn list(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        runner.begin_command(Self::program(ctx.tools));
        runner.add_args(["l", "-slt", "-bd", "-y"]);
        Self::add_password_arg(ctx, runner, false);
        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.set_parser(Box::new(SevenZipListParser::new()));
        runner.end_command();
    }

    fn add(&self, ctx: &ArchiveContext<'_>, request: &AddRequest, runner: &mut ProcessRunner) {
        runner.begin_command(Self::program(ctx.tools));
        runner.set_working_dir(&request.base_dir);
        runner.add_arg(if request.update { "u" } else { "a" });
        runner.add_args(["-bd", "-y", "-l"]);

        if let Some(password) = ctx.password() {
            runner.add_secret_arg("-p", password);
            if ctx.encrypt_header
                && self
                    .capabilities(ctx.mime_type, ctx.tools)
                    .contains(Capabilities::ENCRYPT_HEADER)
            {
                runner.add_arg("-mhe=on");
            }
        }

        runner.add_arg(compression_flag(
            ctx.compression,
            ["-mx=1", "-mx=5", "-mx=5", "-mx=7"],
        ));
        if ctx.volume_size > 0 {
            runner.add_arg(format!("-v{}b", ctx.volume_size));
        }

        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.add_args(request.files.iter().cloned());
        runner.set_parser(ProgressParser::boxed(&["Compressing  "], request.files.len()));
        runner.end_command();
    }

    fn delete(&self, ctx: &ArchiveContext<'_>, files: &[String], runner: &mut ProcessRunner) {
        runner.begin_command(Self::program(ctx.tools));
        runner.add_args(["d", "-bd", "-y"]);
        Self::add_password_arg(ctx, runner, false);
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
        runner.add_args(["-bd", "-y"]);
        runner.add_arg(if request.overwrite { "-aoa" } else { "-aos" });
        Self::add_password_arg(ctx, runner, true);
        runner.add_arg(format!("-o{}", request.destination.to_string_lossy()));
        runner.add_arg("--");
        runner.add_arg(ctx.archive_arg());
        runner.add_args(request.files.iter().cloned());
        runner.set_parser(ProgressParser::boxed(&["Extracting  "], total_files));
        runner.end_command();
    }

    fn test(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        runner.begin_command(Self::program(ctx.tools));
        runner.add_args(["t", "-bd", "-y"]);
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
            if line.contains("Wrong password") || line.contains("Enter password") {
                *error = ProcError::new(ProcErrorKind::AskPassword);
                return;
            }
            if line.contains("Unsupported Method") {
                *error = ProcError::new(ProcErrorKind::UnsupportedFormat);
                return;
            }
            for phrase in ["Cannot find volume", "Missing volume"] {
                if line.contains(phrase) {
                    let name = name_after(line, phrase).unwrap_or_else(|| line.trim().to_string());
                    *error = ProcError::missing_volume(name);
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    /// 배너와 압축 파일 헤더를 건너뛰는 중
    PreHeader,
    /// `Key = Value` 라인을 모으는 중
    Listing,
}

/// 모으는 중인 엔트리 하나
#[derive(Debug, Default)]
struct PendingEntry {
    path: Option<String>,
    is_directory: bool,
    size: u64,
    modified: Option<SystemTime>,
    encrypted: bool,
}

impl PendingEntry {
    fn into_entry(self) -> Option<FileEntry> {
        let path = self.path?;
        let mut entry = FileEntry::from_archive_path(&path, self.is_directory);
        if !entry.is_directory {
            entry.size = self.size;
        }
        if let Some(modified) = self.modified {
            entry.modified = modified;
        }
        entry.encrypted = self.encrypted;
        Some(entry)
    }
}

/// `7z l -slt` 출력 파서
pub struct SevenZipListParser {
    state: ListState,
    old_style: bool,
    pending: PendingEntry,
}

impl Default for SevenZipListParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SevenZipListParser {
    pub fn new() -> Self {
        Self {
            state: ListState::PreHeader,
            old_style: false,
            pending: PendingEntry::default(),
        }
    }

    fn flush(&mut self, events: &mut Vec<ParseEvent>) {
        if let Some(entry) = std::mem::take(&mut self.pending).into_entry() {
            events.push(ParseEvent::Entry(entry));
        }
    }

    fn parse_header_line(&mut self, line: &str, events: &mut Vec<ParseEvent>) {
        if let Some(version) = line
            .strip_prefix("p7zip Version ")
            .and_then(parse_version)
        {
            self.old_style = version < NEW_LISTING_VERSION;
            return;
        }
        if line.starts_with("Listing archive:") {
            if self.old_style {
                self.state = ListState::Listing;
            }
            return;
        }
        if line.starts_with("----------") {
            if !self.old_style {
                self.state = ListState::Listing;
            }
            return;
        }
        if is_multivolume_line(line) {
            events.push(ParseEvent::MultiVolume);
        }
    }

    fn parse_field(&mut self, line: &str, events: &mut Vec<ParseEvent>) {
        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let key = key.trim();
        let value = value.strip_prefix(' ').unwrap_or(value);

        match key {
            "Path" if !value.is_empty() => self.pending.path = Some(value.to_string()),
            "Folder" => self.pending.is_directory = value.trim() == "+",
            "Size" => self.pending.size = value.trim().parse().unwrap_or(0),
            "Modified" => self.pending.modified = parse_modified(value.trim()),
            "Encrypted" => {
                if value.trim() == "+" {
                    self.pending.encrypted = true;
                }
            }
            "Method" => {
                if value.contains("AES") {
                    self.pending.encrypted = true;
                }
            }
            "Attributes" => {
                let value = value.trim();
                if !value.is_empty() {
                    self.pending.is_directory = value.starts_with('D');
                }
            }
            "Multivolume" => {
                if value.trim() == "+" {
                    events.push(ParseEvent::MultiVolume);
                }
            }
            _ => {}
        }
    }
}

impl OutputParser for SevenZipListParser {
    fn parse_line(&mut self, stream: OutputStream, line: &str, events: &mut Vec<ParseEvent>) {
        if stream != OutputStream::Stdout {
            return;
        }
        match self.state {
            ListState::PreHeader => self.parse_header_line(line, events),
            ListState::Listing => {
                if line.trim().is_empty() {
                    self.flush(events);
                } else {
                    self.parse_field(line, events);
                }
            }
        }
    }

    fn finish(&mut self, events: &mut Vec<ParseEvent>) {
        if self.state == ListState::Listing {
            self.flush(events);
        }
    }
}

fn is_multivolume_line(line: &str) -> bool {
    line.split_once('=')
        .map(|(key, value)| key.trim() == "Multivolume" && value.trim() == "+")
        .unwrap_or(false)
}

/// `"4.55 (locale=...)"` → (4, 55)
fn parse_version(text: &str) -> Option<(u32, u32)> {
    let token = text.split_whitespace().next()?;
    let (major, minor) = token.split_once('.')?;
    let minor_digits: String = minor.chars().take_while(|c| c.is_ascii_digit()).collect();
    let mut minor: u32 = minor_digits.parse().ok()?;
    if minor_digits.len() == 1 {
        minor *= 10;
    }
    Some((major.parse().ok()?, minor))
}

/// `YYYY-MM-DD HH:MM:SS[.fraction]` (지역 시간)
fn parse_modified(text: &str) -> Option<SystemTime> {
    let text = text.get(..19).unwrap_or(text);
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}
