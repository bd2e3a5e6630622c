//! GNU tar 드라이버 (압축 프로그램 조합)
//!
//! 압축된 tar에 추가/삭제할 때는 임시 디렉토리에서 압축 해제 → 수정 →
//! 재압축 후 원래 위치로 옮긴다. 임시 디렉토리는 항상 실행되는 정리
//! 단계가 지운다.

use super::{
    compression_flag, scratch_dir, split_fields, ArchiveBackend, ArchiveContext,
    BackendProperties, ProgressParser,
};
use crate::models::{AddRequest, Capabilities, ExtractRequest, FileEntry};
use crate::system::{OutputParser, OutputStream, ParseEvent, ProcessRunner, ToolLocator};
use chrono::{Local, NaiveDateTime, TimeZone};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// tar에 조합하는 압축 프로그램
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Compressor {
    program: &'static str,
    tar_flag: &'static str,
    extension: &'static str,
    package: &'static str,
}

const MIME_TYPES: &[&str] = &[
    "application/x-tar",
    "application/x-compressed-tar",
    "application/x-bzip-compressed-tar",
    "application/x-xz-compressed-tar",
    "application/x-lzip-compressed-tar",
];

fn compressor(mime_type: &str) -> Option<Compressor> {
    let (program, tar_flag, extension, package) = match mime_type {
        "application/x-compressed-tar" => ("gzip", "-z", ".gz", "gzip"),
        "application/x-bzip-compressed-tar" => ("bzip2", "-j", ".bz2", "bzip2"),
        "application/x-xz-compressed-tar" => ("xz", "-J", ".xz", "xz-utils"),
        "application/x-lzip-compressed-tar" => ("lzip", "--lzip", ".lz", "lzip"),
        _ => return None,
    };
    Some(Compressor {
        program,
        tar_flag,
        extension,
        package,
    })
}

pub struct TarBackend;

impl TarBackend {
    fn begin_tar(runner: &mut ProcessRunner) {
        runner.begin_command("tar");
        runner.add_args(["--force-local", "--no-wildcards"]);
    }

    fn add_compress_flag(ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        if let Some(c) = compressor(ctx.mime_type) {
            runner.add_arg(c.tar_flag);
        }
    }

    /// 압축된 tar를 임시 디렉토리에 풀고 `modify`로 수정한 뒤 되돌려 놓는 명령 큐
    fn queue_recompress(
        ctx: &ArchiveContext<'_>,
        c: Compressor,
        runner: &mut ProcessRunner,
        modify: impl FnOnce(&Path, &mut ProcessRunner),
    ) {
        let parent = ctx.path.parent().unwrap_or_else(|| Path::new("."));
        let work_dir = scratch_dir(parent, "tar");
        let plain = work_dir.join("archive.tar");
        let compressed = PathBuf::from(format!("{}{}", plain.to_string_lossy(), c.extension));

        runner.begin_command("mkdir");
        runner.add_arg("-p");
        runner.add_arg(work_dir.to_string_lossy());
        runner.end_command();

        runner.begin_command("cp");
        runner.add_arg("-f");
        runner.add_arg(ctx.archive_arg());
        runner.add_arg(compressed.to_string_lossy());
        runner.end_command();

        runner.begin_command(c.program);
        runner.add_args(["-d", "-f"]);
        runner.add_arg(compressed.to_string_lossy());
        runner.end_command();

        modify(&plain, runner);

        runner.begin_command(c.program);
        runner.add_arg("-f");
        runner.add_arg(compression_flag(ctx.compression, ["-1", "-3", "-6", "-9"]));
        runner.add_arg(plain.to_string_lossy());
        runner.end_command();

        runner.begin_command("mv");
        runner.add_arg("-f");
        runner.add_arg(compressed.to_string_lossy());
        runner.add_arg(ctx.archive_arg());
        runner.end_command();

        runner.begin_command("rm");
        runner.add_arg("-rf");
        runner.add_arg(work_dir.to_string_lossy());
        runner.set_sticky(true);
        runner.end_command();
    }
}

impl ArchiveBackend for TarBackend {
    fn id(&self) -> &'static str {
        "tar"
    }

    fn mime_types(&self) -> &'static [&'static str] {
        MIME_TYPES
    }

    fn capabilities(&self, mime_type: &str, tools: &dyn ToolLocator) -> Capabilities {
        if !MIME_TYPES.contains(&mime_type) || !tools.tool_available_on_path("tar") {
            return Capabilities::NONE;
        }
        match compressor(mime_type) {
            Some(c) if !tools.tool_available_on_path(c.program) => Capabilities::NONE,
            _ => Capabilities::READ_WRITE | Capabilities::ARCHIVE_MANY_FILES,
        }
    }

    fn packages(&self, mime_type: &str) -> Option<&'static str> {
        if !MIME_TYPES.contains(&mime_type) {
            return None;
        }
        Some(match compressor(mime_type).map(|c| c.package) {
            Some("gzip") => "tar,gzip",
            Some("bzip2") => "tar,bzip2",
            Some("xz-utils") => "tar,xz-utils",
            Some("lzip") => "tar,lzip",
            _ => "tar",
        })
    }

    fn properties(&self) -> BackendProperties {
        BackendProperties {
            extract_can_avoid_overwrite: true,
            extract_can_skip_older: true,
            extract_can_junk_paths: false,
        }
    }

    fn list(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        Self::begin_tar(runner);
        runner.add_arg("-tvf");
        runner.add_arg(ctx.archive_arg());
        Self::add_compress_flag(ctx, runner);
        runner.set_parser(Box::new(TarListParser));
        runner.end_command();
    }

    fn add(&self, ctx: &ArchiveContext<'_>, request: &AddRequest, runner: &mut ProcessRunner) {
        let mode = if request.update { "-uvf" } else { "-rvf" };
        let total = request.files.len();

        // 새 압축 파일은 한 번에 생성
        if !ctx.path.exists() {
            Self::begin_tar(runner);
            runner.set_working_dir(&request.base_dir);
            runner.add_arg("-cv");
            Self::add_compress_flag(ctx, runner);
            runner.add_arg("-f");
            runner.add_arg(ctx.archive_arg());
            if !request.recursive {
                runner.add_arg("--no-recursion");
            }
            runner.add_arg("--");
            runner.add_args(request.files.iter().cloned());
            runner.set_parser(ProgressParser::boxed(&[""], total));
            runner.end_command();
            return;
        }

        let append = |archive: &Path, runner: &mut ProcessRunner| {
            Self::begin_tar(runner);
            runner.set_working_dir(&request.base_dir);
            runner.add_arg(mode);
            runner.add_arg(archive.to_string_lossy());
            if !request.recursive {
                runner.add_arg("--no-recursion");
            }
            runner.add_arg("--");
            runner.add_args(request.files.iter().cloned());
            runner.set_parser(ProgressParser::boxed(&[""], total));
            runner.end_command();
        };

        match compressor(ctx.mime_type) {
            Some(c) => Self::queue_recompress(ctx, c, runner, append),
            None => append(ctx.path, runner),
        }
    }

    fn delete(&self, ctx: &ArchiveContext<'_>, files: &[String], runner: &mut ProcessRunner) {
        let remove = |archive: &Path, runner: &mut ProcessRunner| {
            Self::begin_tar(runner);
            runner.add_args(["--delete", "-vf"]);
            runner.add_arg(archive.to_string_lossy());
            runner.add_arg("--");
            runner.add_args(files.iter().cloned());
            runner.set_parser(ProgressParser::boxed(&[""], files.len()));
            runner.end_command();
        };

        match compressor(ctx.mime_type) {
            Some(c) => Self::queue_recompress(ctx, c, runner, remove),
            None => remove(ctx.path, runner),
        }
    }

    fn extract(
        &self,
        ctx: &ArchiveContext<'_>,
        request: &ExtractRequest,
        total_files: usize,
        runner: &mut ProcessRunner,
    ) {
        Self::begin_tar(runner);
        runner.add_arg("-xvf");
        runner.add_arg(ctx.archive_arg());
        Self::add_compress_flag(ctx, runner);
        if !request.overwrite {
            runner.add_arg("--skip-old-files");
        }
        if request.skip_older {
            runner.add_arg("--keep-newer-files");
        }
        runner.add_arg("-C");
        runner.add_arg(request.destination.to_string_lossy());
        runner.add_arg("--");
        runner.add_args(request.files.iter().cloned());
        runner.set_parser(ProgressParser::boxed(&[""], total_files));
        runner.end_command();
    }

    fn test(&self, ctx: &ArchiveContext<'_>, runner: &mut ProcessRunner) {
        Self::begin_tar(runner);
        runner.add_arg("-tf");
        runner.add_arg(ctx.archive_arg());
        Self::add_compress_flag(ctx, runner);
        runner.set_parser(ProgressParser::boxed(&[""], 0));
        runner.end_command();
    }
}

/// `tar -tv` 출력 파서 (`ls -l` 형식, 한 줄에 한 엔트리)
pub struct TarListParser;

impl OutputParser for TarListParser {
    fn parse_line(&mut self, stream: OutputStream, line: &str, events: &mut Vec<ParseEvent>) {
        if stream != OutputStream::Stdout {
            return;
        }
        if let Some(entry) = parse_ls_line(line) {
            events.push(ParseEvent::Entry(entry));
        }
    }
}

/// `drwxr-xr-x user/group 0 2020-01-02 03:04 dir/`
fn parse_ls_line(line: &str) -> Option<FileEntry> {
    let (fields, rest) = split_fields(line, 5)?;
    let permissions = fields[0];
    let kind = permissions.chars().next()?;

    let (name, link_target) = match kind {
        'l' => match rest.split_once(" -> ") {
            Some((name, target)) => (name, Some(target)),
            None => (rest, None),
        },
        'h' => match rest.split_once(" link to ") {
            Some((name, target)) => (name, Some(target)),
            None => (rest, None),
        },
        _ => (rest, None),
    };

    let mut entry = FileEntry::from_archive_path(name, kind == 'd');
    if !entry.is_directory {
        entry.size = fields[2].parse().unwrap_or(0);
    }
    if let Some(modified) = parse_timestamp(fields[3], fields[4]) {
        entry.modified = modified;
    }
    entry.link_target = link_target.map(str::to_string);
    Some(entry)
}

fn parse_timestamp(date: &str, time: &str) -> Option<SystemTime> {
    let text = format!("{} {}", date, time);
    let naive = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::StaticToolLocator;

    #[test]
    fn test_parse_ls_lines() {
        let file = parse_ls_line("-rw-r--r-- me/staff      42 2020-01-02 03:04 a/b c.txt")
            .expect("file line");
        assert_eq!(file.full_path, "/a/b c.txt");
        assert_eq!(file.size, 42);

        let dir = parse_ls_line("drwxr-xr-x me/staff       0 2020-01-02 03:04 a/")
            .expect("dir line");
        assert!(dir.is_directory);
        assert_eq!(dir.full_path, "/a/");

        let link = parse_ls_line("lrwxrwxrwx me/staff       0 2020-01-02 03:04 latest -> a/b c.txt")
            .expect("link line");
        assert_eq!(link.name, "latest");
        assert_eq!(link.link_target.as_deref(), Some("a/b c.txt"));

        assert!(parse_ls_line("tar: Removing leading `/' from member names").is_none());
    }

    #[test]
    fn test_capabilities_need_compressor() {
        let backend = TarBackend;
        let tar_only = StaticToolLocator::new(["tar"]);
        assert!(backend
            .capabilities("application/x-tar", &tar_only)
            .contains(Capabilities::READ_WRITE));
        assert!(backend
            .capabilities("application/x-xz-compressed-tar", &tar_only)
            .is_empty());
        let with_xz = StaticToolLocator::new(["tar", "xz"]);
        assert!(backend
            .capabilities("application/x-xz-compressed-tar", &with_xz)
            .contains(Capabilities::ARCHIVE_MANY_FILES));
        assert_eq!(
            backend.packages("application/x-xz-compressed-tar"),
            Some("tar,xz-utils")
        );
    }

    #[test]
    fn test_compressed_delete_ends_with_sticky_cleanup() {
        let tools = StaticToolLocator::new(["tar", "gzip"]);
        let ctx = ArchiveContext::new(
            Path::new("/data/backup.tar.gz"),
            "application/x-compressed-tar",
            &tools,
        );
        let mut runner = ProcessRunner::new();
        TarBackend.delete(&ctx, &["old.txt".to_string()], &mut runner);

        let queue = runner.describe_queue();
        assert_eq!(queue.len(), 7);
        assert!(queue[0].starts_with("mkdir -p /data/.bokslarc-tar-"));
        assert!(queue[2].starts_with("gzip -d -f "));
        assert!(queue[3].contains("--delete -vf"));
        assert!(queue[3].ends_with("-- old.txt"));
        assert!(queue[5].ends_with(" /data/backup.tar.gz"));
        assert!(queue[6].starts_with("rm -rf /data/.bokslarc-tar-"));
        assert!(queue[6].ends_with("[sticky]"));
    }

    #[test]
    fn test_new_archive_is_created_in_one_step() {
        let temp = tempfile::tempdir().expect("create tempdir");
        let archive = temp.path().join("new.tar.bz2");
        let tools = StaticToolLocator::new(["tar", "bzip2"]);
        let ctx = ArchiveContext::new(&archive, "application/x-bzip-compressed-tar", &tools);
        let mut runner = ProcessRunner::new();
        let request = AddRequest::new(vec!["a.txt".to_string()], temp.path().to_path_buf());
        TarBackend.add(&ctx, &request, &mut runner);

        let queue = runner.describe_queue();
        assert_eq!(queue.len(), 1);
        assert!(queue[0].starts_with("tar --force-local --no-wildcards -cv -j -f "));
        assert!(queue[0].ends_with("-- a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_plain_tar_round_trip_with_real_tool() {
        use std::fs;
        let tools = crate::system::PathToolLocator;
        let is_gnu_tar = std::process::Command::new("tar")
            .arg("--version")
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains("GNU tar"))
            .unwrap_or(false);
        if !is_gnu_tar {
            return;
        }
        let temp = tempfile::tempdir().expect("create tempdir");
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("docs")).expect("create src");
        fs::write(src.join("docs/readme.txt"), "hello").expect("write file");
        let archive = temp.path().join("out.tar");

        let ctx = ArchiveContext::new(&archive, "application/x-tar", &tools);
        let mut runner = ProcessRunner::new();
        TarBackend.add(&ctx, &AddRequest::new(vec!["docs".to_string()], src), &mut runner);
        assert!(!runner.run_to_completion(&mut ()).error.is_error());

        #[derive(Default)]
        struct Entries(Vec<FileEntry>);
        impl crate::system::ProcessObserver for Entries {
            fn parse_event(&mut self, event: ParseEvent) {
                if let ParseEvent::Entry(entry) = event {
                    self.0.push(entry);
                }
            }
        }

        TarBackend.list(&ctx, &mut runner);
        let mut entries = Entries::default();
        assert!(!runner.run_to_completion(&mut entries).error.is_error());
        let paths: Vec<&str> = entries.0.iter().map(|e| e.full_path.as_str()).collect();
        assert!(paths.contains(&"/docs/"));
        assert!(paths.contains(&"/docs/readme.txt"));
    }
}
