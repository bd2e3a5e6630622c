//! Info-ZIP 드라이버 (쓰기 `zip`, 읽기 `unzip`)

use super::{
    compression_flag, split_fields, ArchiveBackend, ArchiveContext, BackendProperties, ExitPolicy,
    ProgressParser,
};
use crate::models::{
    AddRequest, ArchiveAction, Capabilities, CapturedOutput, ExtractRequest, FileEntry, ProcError,
    ProcErrorKind,
};
use crate::system::{OutputParser, OutputStream, ParseEvent, ProcessRunner, ToolLocator};
use chrono::{Local, NaiveDateTime, TimeZone};
use std::time::SystemTime;

const MIME_TYPES: &[&str] = &[
    "application/zip",
    "application/x-java-archive",
    "application/x-cbz",
    "application/x-ear",
    "application/x-war",
    "application/x-ms-dos-executable",
];

/// `zip -d`의 "nothing to do" 종료 코드
const ZIP_NOTHING_TO_DO: i32 = 12;

pub struct ZipBackend;

impl ZipBackend {
    /// unzip은 암호가 없으면 터미널에서 묻기 때문에 항상 `-P`를 넘긴다
    fn add_password_arg(ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner, always: bool) {
        match ctx.password() {
            Some(password) => {
                runner.add_arg("-P");
                runner.add_secret_arg("", password);
            }
            None if always => {
                runner.add_arg("-P");
                runner.add_arg("");
            }
            None => {}
        }
    }
}

/// 디스크 파일 인자. `zip`은 `./`를 떼고 저장하므로 옵션으로 읽히지 않게 붙인다
fn local_file_arg(name: &str) -> String {
    if name.starts_with('/') || name.starts_with("./") {
        name.to_string()
    } else {
        format!("./{}", name)
    }
}

/// 압축 파일 안 이름 패턴. `-`로 시작하면 와일드카드 `[-]`로 감싼다
fn member_arg(name: &str) -> String {
    match name.strip_prefix('-') {
        Some(rest) => format!("[-]{}", rest),
        None => name.to_string(),
    }
}

impl ArchiveBackend for ZipBackend {
    fn id(&self) -> &'static str {
        "zip"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        MIME_TYPES
    }

    fn capabilities(&self, mime_type: &str, tools: &dyn ToolLocator) -> Capabilities {
        if !MIME_TYPES.contains(&mime_type) {
            return Capabilities::NONE;
        }
        let mut caps = Capabilities::NONE;
        if tools.tool_available_on_path("unzip") {
            caps |= Capabilities::READ;
        }
        // 자동 압축 해제 실행 파일은 읽기만
        if mime_type != "application/x-ms-dos-executable" && tools.tool_available_on_path("zip") {
            caps |= Capabilities::WRITE | Capabilities::ARCHIVE_MANY_FILES | Capabilities::ENCRYPT;
        }
        caps
    }

    fn packages(&self, mime_type: &str) -> Option<&'static str> {
        MIME_TYPES.contains(&mime_type).then_some("zip,unzip")
    }

    fn properties(&self) -> BackendProperties {
        BackendProperties {
            extract_can_avoid_overwrite: true,
            extract_can_skip_older: true,
            extract_can_junk_paths: true,
        }
    }

    fn list(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        runner.begin_command("unzip");
        runner.add_arg("-ZTs");
        runner.add_arg(ctx.archive_arg());
        runner.set_parser(Box::new(ZipInfoParser));
        runner.end_command();
    }

    fn add(&self, ctx: &ArchiveContext<'_>, request: &AddRequest, runner: &mut ProcessRunner) {
        runner.begin_command("zip");
        runner.set_working_dir(&request.base_dir);
        if request.recursive {
            runner.add_arg("-r");
        }
        if request.update {
            runner.add_arg("-u");
        }
        Self::add_password_arg(ctx, runner, false);
        runner.add_arg(compression_flag(ctx.compression, ["-0", "-3", "-6", "-9"]));
        runner.add_arg(ctx.archive_arg());
        runner.add_args(request.files.iter().map(|f| local_file_arg(f)));
        runner.set_parser(ProgressParser::boxed(
            &["  adding: ", "updating: "],
            request.files.len(),
        ));
        runner.end_command();
    }

    fn delete(&self, ctx: &ArchiveContext<'_>, files: &[String], runner: &mut ProcessRunner) {
        runner.begin_command("zip");
        runner.add_arg("-d");
        runner.add_arg(ctx.archive_arg());
        runner.add_args(files.iter().map(|f| member_arg(f)));
        runner.set_parser(ProgressParser::boxed(&["deleting: "], files.len()));
        runner.end_command();
    }

    fn extract(
        &self,
        ctx: &ArchiveContext<'_>,
        request: &ExtractRequest,
        total_files: usize,
        runner: &mut ProcessRunner,
    ) {
        runner.begin_command("unzip");
        runner.add_arg(if request.overwrite { "-o" } else { "-n" });
        if request.skip_older {
            runner.add_arg("-u");
        }
        if request.junk_paths {
            runner.add_arg("-j");
        }
        Self::add_password_arg(ctx, runner, true);
        runner.add_arg(ctx.archive_arg());
        runner.add_args(request.files.iter().map(|f| member_arg(f)));
        runner.add_arg("-d");
        runner.add_arg(request.destination.to_string_lossy());
        runner.set_parser(ProgressParser::boxed(
            &["  inflating: ", " extracting: "],
            total_files,
        ));
        runner.end_command();
    }

    fn test(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        runner.begin_command("unzip");
        runner.add_arg("-t");
        Self::add_password_arg(ctx, runner, true);
        runner.add_arg(ctx.archive_arg());
        runner.set_parser(ProgressParser::boxed(&["    testing: "], 0));
        runner.end_command();
    }

    fn exit_policy(&self, action: ArchiveAction) -> ExitPolicy {
        if matches!(
            action,
            ArchiveAction::LoadingArchive | ArchiveAction::ListingContent
        ) {
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
        if action == ArchiveAction::DeletingFiles && error.status == Some(ZIP_NOTHING_TO_DO) {
            *error = ProcError::none();
            return;
        }

        for line in output.lines_rev() {
            let lower = line.to_lowercase();
            if lower.contains("incorrect password") || lower.contains("unable to get password") {
                *error = ProcError::new(ProcErrorKind::AskPassword);
                return;
            }
            if lower.contains("unsupported compression method") {
                *error = ProcError::new(ProcErrorKind::UnsupportedFormat);
                return;
            }
        }
    }
}

/// `unzip -ZTs` (zipinfo) 출력 파서
///
/// `-rw-r--r--  3.0 unx   42 tx defN 20200102.030405 a/b.txt`
pub struct ZipInfoParser;

impl OutputParser for ZipInfoParser {
    fn parse_line(&mut self, stream: OutputStream, line: &str, events: &mut Vec<ParseEvent>) {
        if stream != OutputStream::Stdout {
            return;
        }
        if let Some(entry) = parse_zipinfo_line(line) {
            events.push(ParseEvent::Entry(entry));
        }
    }
}

fn parse_zipinfo_line(line: &str) -> Option<FileEntry> {
    let (fields, name) = split_fields(line, 7)?;
    let modified = parse_timestamp(fields[6])?;
    let size: u64 = fields[3].parse().ok()?;

    let is_directory = fields[0].starts_with('d') || name.ends_with('/');
    // 대문자 T/B는 암호화된 엔트리
    let encrypted = fields[4]
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false);

    let mut entry = FileEntry::from_archive_path(name, is_directory);
    if !is_directory {
        entry.size = size;
    }
    entry.modified = modified;
    entry.encrypted = encrypted;
    Some(entry)
}

/// `yyyymmdd.hhmmss`
fn parse_timestamp(text: &str) -> Option<SystemTime> {
    let naive = NaiveDateTime::parse_from_str(text, "%Y%m%d.%H%M%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticToolLocator;
    use std::path::Path;

    #[test]
    fn test_parse_zipinfo_lines() {
        let lines = [
            "Archive:  test.zip",
            "Zip file size: 1234 bytes, number of entries: 3",
            "drwxr-xr-x  3.0 unx        0 bx stor 20200102.030405 docs/",
            "-rw-r--r--  3.0 unx       42 tx defN 20200102.030405 docs/read me.txt",
            "-rw-r--r--  3.0 unx       10 BX stor 20200102.030405 docs/secret.bin",
            "3 files, 52 bytes uncompressed, 40 bytes compressed:  23.1%",
        ];
        let mut parser = ZipInfoParser;
        let mut events = Vec::new();
        for line in lines {
            parser.parse_line(OutputStream::Stdout, line, &mut events);
        }
        let entries: Vec<FileEntry> = events
            .into_iter()
            .filter_map(|e| match e {
                ParseEvent::Entry(entry) => Some(entry),
                _ => None,
            })
            .collect();

        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_directory);
        assert_eq!(entries[0].full_path, "/docs/");
        assert_eq!(entries[1].full_path, "/docs/read me.txt");
        assert_eq!(entries[1].size, 42);
        assert!(!entries[1].encrypted);
        assert!(entries[2].encrypted);
    }

    #[test]
    fn test_delete_nothing_to_do_is_tolerated() {
        let mut error = ProcError::exited(ZIP_NOTHING_TO_DO);
        ZipBackend.handle_error(
            ArchiveAction::DeletingFiles,
            &mut error,
            &CapturedOutput::default(),
        );
        assert!(!error.is_error());

        let mut error = ProcError::exited(ZIP_NOTHING_TO_DO);
        ZipBackend.handle_error(
            ArchiveAction::AddingFiles,
            &mut error,
            &CapturedOutput::default(),
        );
        assert!(error.is_error());
    }

    #[test]
    fn test_incorrect_password_asks_again() {
        let output = CapturedOutput {
            stdout: vec!["   skipping: secret.bin              incorrect password".to_string()],
            ..CapturedOutput::default()
        };
        let mut error = ProcError::exited(82);
        ZipBackend.handle_error(ArchiveAction::ExtractingFiles, &mut error, &output);
        assert_eq!(error.kind, ProcErrorKind::AskPassword);
    }

    #[test]
    fn test_capabilities_split_between_tools() {
        let backend = ZipBackend;
        let unzip_only = StaticToolLocator::new(["unzip"]);
        assert_eq!(
            backend.capabilities("application/zip", &unzip_only),
            Capabilities::READ
        );
        let both = StaticToolLocator::new(["zip", "unzip"]);
        assert!(backend
            .capabilities("application/x-java-archive", &both)
            .contains(Capabilities::READ_WRITE | Capabilities::ENCRYPT));
        assert_eq!(
            backend.capabilities("application/x-ms-dos-executable", &both),
            Capabilities::READ
        );
    }

    #[test]
    fn test_extract_always_passes_password_option() {
        let tools = StaticToolLocator::new(["unzip"]);
        let ctx = ArchiveContext::new(Path::new("/tmp/a.zip"), "application/zip", &tools);
        let mut runner = ProcessRunner::new();
        let mut request = ExtractRequest::new(vec!["a.txt".to_string()], "/tmp/out".into());
        request.junk_paths = true;
        ZipBackend.extract(&ctx, &request, 1, &mut runner);
        assert_eq!(
            runner.describe_queue(),
            vec!["unzip -o -j -P  /tmp/a.zip a.txt -d /tmp/out"]
        );
    }

    #[test]
    fn test_names_starting_with_dash_are_not_options() {
        let tools = StaticToolLocator::new(["zip", "unzip"]);
        let ctx = ArchiveContext::new(Path::new("/tmp/a.zip"), "application/zip", &tools);
        let mut runner = ProcessRunner::new();

        let add = AddRequest::new(vec!["-rf".to_string(), "docs".to_string()], "/tmp/in".into());
        ZipBackend.add(&ctx, &add, &mut runner);
        ZipBackend.delete(&ctx, &["-x".to_string(), "docs/a.txt".to_string()], &mut runner);
        let extract = ExtractRequest::new(vec!["-d".to_string()], "/tmp/out".into());
        ZipBackend.extract(&ctx, &extract, 1, &mut runner);

        let queue = runner.describe_queue();
        assert!(queue[0].ends_with("/tmp/a.zip ./-rf ./docs"), "{}", queue[0]);
        assert_eq!(queue[1], "zip -d /tmp/a.zip [-]x docs/a.txt");
        assert!(queue[2].ends_with("/tmp/a.zip [-]d -d /tmp/out"), "{}", queue[2]);
    }
}
