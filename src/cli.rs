//! 명령줄 옵션

use bokslarc::core::{add_batch, extract_batch, extract_here_batch};
use bokslarc::models::BatchAction;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "bokslarc",
    version,
    about = "Archive manager for the terminal, driven by installed archivers",
    disable_help_flag = true
)]
pub struct Cli {
    /// Add files to the specified archive and quit
    #[arg(short = 'a', long = "add-to", value_name = "ARCHIVE")]
    pub add_to: Option<PathBuf>,

    /// Add files asking the name of the archive and quit
    #[arg(short = 'd', long = "add")]
    pub add: bool,

    /// Extract archives to the specified folder and quit
    #[arg(short = 'e', long = "extract-to", value_name = "FOLDER")]
    pub extract_to: Option<PathBuf>,

    /// Extract archives to the default folder and quit
    #[arg(short = 'f', long = "extract")]
    pub extract: bool,

    /// Extract the contents of the archives in the archive folder and quit
    #[arg(short = 'h', long = "extract-here")]
    pub extract_here: bool,

    /// Default folder to use for the '--add' and '--extract' commands
    #[arg(long = "default-dir", value_name = "FOLDER")]
    pub default_dir: Option<PathBuf>,

    /// Create destination folder without asking confirmation
    #[arg(long)]
    pub force: bool,

    /// List the contents of the archives
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Test the integrity of the archives
    #[arg(short = 't', long)]
    pub test: bool,

    /// Password for encrypted archives
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Log every command that is executed
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Archives (or files to add)
    pub files: Vec<PathBuf>,
}

/// 실행 모드
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    AddTo(PathBuf),
    Add,
    ExtractTo(PathBuf),
    Extract,
    ExtractHere,
    Test,
    List,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if let Some(archive) = &self.add_to {
            Mode::AddTo(archive.clone())
        } else if self.add {
            Mode::Add
        } else if let Some(folder) = &self.extract_to {
            Mode::ExtractTo(folder.clone())
        } else if self.extract {
            Mode::Extract
        } else if self.extract_here {
            Mode::ExtractHere
        } else if self.test {
            Mode::Test
        } else {
            Mode::List
        }
    }
}

/// 모드와 파일 목록으로 배치 구성 (목록 모드는 배치를 쓰지 않음)
pub fn build_batch(mode: &Mode, files: &[PathBuf]) -> Vec<BatchAction> {
    match mode {
        Mode::AddTo(archive) => add_batch(archive.clone(), files.to_vec()),
        Mode::Add => vec![BatchAction::Open(files.to_vec()), BatchAction::Close],
        Mode::ExtractTo(folder) => files
            .iter()
            .flat_map(|archive| extract_batch(archive.clone(), Some(folder.clone())))
            .collect(),
        Mode::Extract => files
            .iter()
            .flat_map(|archive| extract_batch(archive.clone(), None))
            .collect(),
        Mode::ExtractHere => files
            .iter()
            .flat_map(|archive| extract_here_batch(archive.clone()))
            .collect(),
        Mode::Test => files
            .iter()
            .flat_map(|archive| {
                [
                    BatchAction::Load(archive.clone()),
                    BatchAction::Test,
                    BatchAction::Close,
                ]
            })
            .collect(),
        Mode::List => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        let cli = Cli::parse_from(["bokslarc", "-h", "a.7z"]);
        assert_eq!(cli.mode(), Mode::ExtractHere);
        assert_eq!(cli.files, vec![PathBuf::from("a.7z")]);

        let cli = Cli::parse_from(["bokslarc", "--add-to", "out.zip", "x", "y"]);
        assert_eq!(cli.mode(), Mode::AddTo(PathBuf::from("out.zip")));
        assert_eq!(cli.files.len(), 2);

        let cli = Cli::parse_from(["bokslarc", "a.rar"]);
        assert_eq!(cli.mode(), Mode::List);
    }

    #[test]
    fn test_build_batch_per_archive() {
        let files = vec![PathBuf::from("/a.7z"), PathBuf::from("/b.7z")];
        let actions = build_batch(&Mode::ExtractTo(PathBuf::from("/out")), &files);
        let names: Vec<&str> = actions.iter().map(BatchAction::name).collect();
        assert_eq!(
            names,
            vec!["LOAD", "EXTRACT", "CLOSE", "LOAD", "EXTRACT", "CLOSE"]
        );

        let actions = build_batch(&Mode::Add, &files);
        assert_eq!(actions[0], BatchAction::Open(files.clone()));
        assert!(build_batch(&Mode::List, &files).is_empty());
    }
}
