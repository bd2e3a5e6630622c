//! 터미널 협력자: 질문, 암호 입력, 진행 표시

use bokslarc::core::ArchiveEvent;
use bokslarc::system::{HostInterface, InstallResult};
use bokslarc::utils::formatter::progress_percentage;
use bokslarc::utils::path_display::{display_path, fit_archive_name};
use bokslarc::utils::Settings;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::Receiver;

const MESSAGE_WIDTH: usize = 40;

pub struct TerminalHost {
    /// 모든 질문에 "예"
    force: bool,
    settings: Settings,
    /// 질문하는 동안 숨길 진행 막대
    bar: Option<ProgressBar>,
}

impl TerminalHost {
    pub fn new(force: bool, settings: Settings) -> Self {
        Self {
            force,
            settings,
            bar: None,
        }
    }

    pub fn attach_progress(&mut self, bar: ProgressBar) {
        self.bar = Some(bar);
    }

    fn ask(&self, question: &str) -> Option<String> {
        match &self.bar {
            Some(bar) => bar.suspend(|| read_answer(question)),
            None => read_answer(question),
        }
    }

    fn ask_yes_no(&self, question: &str) -> bool {
        if self.force {
            return true;
        }
        matches!(
            self.ask(&format!("{} [y/N]", question)).as_deref(),
            Some("y" | "Y" | "yes")
        )
    }
}

impl HostInterface for TerminalHost {
    fn confirm_create_directory(&mut self, path: &Path) -> bool {
        self.ask_yes_no(&format!(
            "Destination folder \"{}\" does not exist. Create it?",
            display_path(path)
        ))
    }

    fn confirm_overwrite(&mut self, path: &Path) -> bool {
        self.ask_yes_no(&format!("Replace file \"{}\"?", display_path(path)))
    }

    fn install_packages(&mut self, packages: &[String]) -> InstallResult {
        if !self.ask_yes_no(&format!(
            "This archive type needs the following packages: {}. Install them?",
            packages.join(", ")
        )) {
            return InstallResult::Declined;
        }
        let argv = match self.settings.install_argv(packages) {
            Ok(argv) => argv,
            Err(e) => return InstallResult::Failed(e.to_string()),
        };
        log::info!("installing packages: {}", argv.join(" "));
        match Command::new(&argv[0]).args(&argv[1..]).status() {
            Ok(status) if status.success() => InstallResult::Installed,
            Ok(status) => InstallResult::Failed(format!("{} exited with {}", argv[0], status)),
            Err(e) => InstallResult::Failed(format!("{}: {}", argv[0], e)),
        }
    }

    fn choose_archive_name(&mut self, files: &[PathBuf]) -> Option<PathBuf> {
        let default = self.settings.archive_name_for(files)?;
        if self.force {
            return Some(default);
        }
        match self.ask(&format!("Archive name [{}]:", display_path(&default))) {
            Some(answer) if answer.is_empty() => Some(default),
            Some(answer) => Some(PathBuf::from(answer)),
            None => None,
        }
    }
}

fn read_answer(question: &str) -> Option<String> {
    eprint!("{} ", question);
    io::stderr().flush().ok()?;
    let mut answer = String::new();
    let read = io::stdin().lock().read_line(&mut answer).ok()?;
    if read == 0 {
        return None;
    }
    Some(answer.trim().to_string())
}

/// 암호 입력 (입력 없이 끝내면 None)
pub fn prompt_password(archive: Option<&Path>) -> Option<String> {
    let prompt = match archive {
        Some(path) => format!("Password for \"{}\": ", display_path(path)),
        None => "Password: ".to_string(),
    };
    match rpassword::prompt_password(prompt) {
        Ok(password) if !password.is_empty() => Some(password),
        Ok(_) => None,
        Err(e) => {
            log::warn!("could not read password: {}", e);
            None
        }
    }
}

/// 세션 이벤트를 진행 막대로 표시
pub struct ProgressView {
    bar: ProgressBar,
    events: Receiver<ArchiveEvent>,
}

impl ProgressView {
    pub fn new(events: Receiver<ArchiveEvent>) -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar, events }
    }

    /// 쌓인 이벤트 반영
    pub fn update(&self) {
        for event in self.events.try_iter() {
            match event {
                ArchiveEvent::ActionStarted(action) => {
                    self.bar.reset();
                    self.bar.set_message(action.name());
                }
                ArchiveEvent::Progress(Some(fraction)) => {
                    self.bar.set_position(u64::from(progress_percentage(fraction)));
                }
                ArchiveEvent::Progress(None) => self.bar.tick(),
                ArchiveEvent::Message(message) => {
                    self.bar.set_message(fit_archive_name(&message, MESSAGE_WIDTH));
                }
                ArchiveEvent::ActionDone(action, error) => {
                    if error.is_error() {
                        log::debug!("{} failed: {}", action.name(), error);
                    } else {
                        self.bar.set_position(100);
                    }
                }
                ArchiveEvent::StoppableChanged(_) => {}
            }
        }
        self.bar.tick();
    }

    pub fn finish(&self) {
        self.update();
        self.bar.finish_and_clear();
    }

    pub fn bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    /// 질문을 출력하기 전에 막대를 숨김
    pub fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bar.suspend(f)
    }
}
