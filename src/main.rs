mod cli;
mod terminal;

use anyhow::{Context, Result};
use bokslarc::core::{
    remediate_unsupported_format, ArchiveSession, BackendRegistry, BatchSequencer, BatchStatus,
};
use bokslarc::models::{BatchAction, ProcErrorKind};
use bokslarc::system::PathToolLocator;
use bokslarc::utils::formatter::{format_entry_line, format_file_size, pluralize};
use bokslarc::utils::Settings;
use clap::Parser;
use cli::{build_batch, Cli, Mode};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use terminal::{prompt_password, ProgressView, TerminalHost};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::FAILURE
        }
    }
}

/// 전체 실행. 모든 배치가 성공하면 true
fn run(cli: Cli) -> Result<bool> {
    let mut settings = Settings::load_default().context("could not load settings")?;
    if let Some(dir) = &cli.default_dir {
        settings.default_extract_dir = Some(absolute(dir)?);
    }
    if cli.force {
        settings.force_directory_creation = true;
    }

    let mode = match cli.mode() {
        Mode::AddTo(archive) => Mode::AddTo(absolute(&archive)?),
        Mode::ExtractTo(folder) => Mode::ExtractTo(absolute(&folder)?),
        other => other,
    };
    let files = cli
        .files
        .iter()
        .map(|file| absolute(file))
        .collect::<Result<Vec<_>>>()?;
    if files.is_empty() {
        anyhow::bail!("no files given (see --help)");
    }

    let tools = PathToolLocator;
    let mut session = ArchiveSession::new(
        BackendRegistry::with_default_backends(&tools),
        Box::new(PathToolLocator),
    );
    session.apply_settings(&settings);
    session.set_password(cli.password.clone());

    let (tx, rx) = mpsc::channel();
    session.subscribe(tx);
    let view = ProgressView::new(rx);
    let mut host = TerminalHost::new(cli.force, settings.clone());
    host.attach_progress(view.bar());

    if mode == Mode::List {
        let mut ok = true;
        for archive in &files {
            let mut batch = BatchSequencer::with_actions([BatchAction::Load(archive.clone())]);
            if drive(&mut batch, &mut session, &mut host, &view) {
                view.suspend(|| print_listing(archive, &session));
            } else {
                ok = false;
            }
            session.close().context("could not close archive")?;
        }
        view.finish();
        return Ok(ok);
    }

    let mut batch = BatchSequencer::with_actions(build_batch(&mode, &files));
    batch.set_default_extract_dir(settings.default_extract_dir.clone());
    let ok = drive(&mut batch, &mut session, &mut host, &view);
    view.finish();
    Ok(ok)
}

/// 배치를 끝까지 실행. 암호 요청과 형식 미지원은 사용자에게 묻고 재개
fn drive(
    batch: &mut BatchSequencer,
    session: &mut ArchiveSession,
    host: &mut TerminalHost,
    view: &ProgressView,
) -> bool {
    let mut status = batch.start(session, host);
    loop {
        view.update();
        match status {
            BatchStatus::Idle | BatchStatus::Running => {
                thread::sleep(POLL_INTERVAL);
                status = batch.poll(session, host);
            }
            BatchStatus::Suspended(error) => {
                let fixed = match error.kind {
                    ProcErrorKind::AskPassword => {
                        match view.suspend(|| prompt_password(session.path())) {
                            Some(password) => {
                                session.set_password(Some(password));
                                true
                            }
                            None => false,
                        }
                    }
                    ProcErrorKind::UnsupportedFormat => {
                        let mime_type = error.details.clone().unwrap_or_default();
                        remediate_unsupported_format(session, host, &mime_type)
                    }
                    _ => false,
                };
                if !fixed {
                    view.suspend(|| report_failure(batch, session));
                    return false;
                }
                status = batch.resume(session, host);
            }
            BatchStatus::Finished | BatchStatus::Quit => return true,
            BatchStatus::Aborted(None) => {
                view.suspend(|| eprintln!("Operation stopped."));
                return false;
            }
            BatchStatus::Aborted(Some(_)) => {
                view.suspend(|| report_failure(batch, session));
                return false;
            }
        }
    }
}

fn report_failure(batch: &BatchSequencer, session: &ArchiveSession) {
    let archive_name = session
        .path()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Some(outcome) = batch.last_outcome() else {
        eprintln!("An error occurred.");
        return;
    };
    eprintln!("{}", outcome.action.failure_headline(&archive_name));
    eprintln!("{}", outcome.error.reason());
    for line in outcome.output.raw() {
        eprintln!("  {}", line);
    }
}

fn print_listing(archive: &Path, session: &ArchiveSession) {
    let entries = session.files();
    println!("{}:", archive.display());
    for entry in entries {
        println!("{}", format_entry_line(entry));
    }
    let files = entries.iter().filter(|e| !e.is_directory).count();
    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!(
        "{}, {}{}",
        pluralize(files, "file", "files"),
        format_file_size(total),
        if session.is_multi_volume() { " (multi-volume)" } else { "" }
    );
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path: {}", path.display()))
}
