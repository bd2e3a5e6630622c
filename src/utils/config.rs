//! 사용자 설정 (TOML)
//!
//! 위치: `$BOKSLARC_SETTINGS_FILE` 또는 `<config_dir>/bokslarc/config.toml`.
//! 파일이 없으면 기본값, 형식이 잘못되면 `ConfigParse` 오류.

use crate::models::CompressionLevel;
use crate::utils::error::{BokslArcError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_ENV: &str = "BOKSLARC_SETTINGS_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 대상 없는 추출의 기본 디렉토리
    pub default_extract_dir: Option<PathBuf>,
    pub compression: CompressionLevel,
    pub encrypt_header: bool,
    /// 분할 크기 (바이트, 0 = 분할 안 함)
    pub volume_size: u64,
    /// 없는 대상 디렉토리를 묻지 않고 생성
    pub force_directory_creation: bool,
    /// 새 압축 파일 이름의 기본 확장자
    pub default_archive_extension: String,
    /// 패키지 설치 명령 (셸 형식, 패키지 이름이 뒤에 붙음)
    pub install_command: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_extract_dir: None,
            compression: CompressionLevel::Normal,
            encrypt_header: false,
            volume_size: 0,
            force_directory_creation: false,
            default_archive_extension: ".tar.gz".to_string(),
            install_command: "pkexec apt-get install -y".to_string(),
        }
    }
}

impl Settings {
    /// 설정 파일 경로 (환경 변수 우선)
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(custom) = env::var(SETTINGS_ENV) {
            let trimmed = custom.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        dirs::config_dir().map(|dir| dir.join("bokslarc").join("config.toml"))
    }

    /// 기본 경로에서 로드 (경로를 알 수 없으면 기본값)
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|reason| BokslArcError::ConfigParse {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let settings: Settings = toml::from_str(content).map_err(|e| e.to_string())?;
        if !settings.default_archive_extension.starts_with('.') {
            return Err(format!(
                "default_archive_extension must start with '.': {}",
                settings.default_archive_extension
            ));
        }
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BokslArcError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 설치 명령 + 패키지 이름
    pub fn install_argv(&self, packages: &[String]) -> Result<Vec<String>> {
        let mut argv = shlex::split(&self.install_command).ok_or_else(|| {
            BokslArcError::Config(format!(
                "install_command is not a valid command line: {}",
                self.install_command
            ))
        })?;
        if argv.is_empty() {
            return Err(BokslArcError::Config("install_command is empty".to_string()));
        }
        argv.extend(packages.iter().cloned());
        Ok(argv)
    }

    /// 파일들을 담을 새 압축 파일의 기본 경로 (첫 파일 옆, 같은 이름)
    pub fn archive_name_for(&self, files: &[PathBuf]) -> Option<PathBuf> {
        let first = files.first()?;
        let stem = if files.len() == 1 {
            first.file_stem()?.to_string_lossy().into_owned()
        } else {
            first
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "archive".to_string())
        };
        let parent = first.parent().unwrap_or_else(|| Path::new("."));
        Some(parent.join(format!("{}{}", stem, self.default_archive_extension)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().expect("tempdir");
        let settings = Settings::load(&temp.path().join("none.toml")).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.default_archive_extension, ".tar.gz");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "compression = \"maximum\"\nvolume_size = 1048576\n").expect("write");
        let settings = Settings::load(&path).expect("load");
        assert_eq!(settings.compression, CompressionLevel::Maximum);
        assert_eq!(settings.volume_size, 1_048_576);
        assert!(!settings.encrypt_header);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "compression = [").expect("write");
        assert!(matches!(
            Settings::load(&path),
            Err(BokslArcError::ConfigParse { .. })
        ));

        fs::write(&path, "default_archive_extension = \"zip\"").expect("write");
        assert!(matches!(
            Settings::load(&path),
            Err(BokslArcError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("nested/config.toml");
        let settings = Settings {
            default_extract_dir: Some(PathBuf::from("/tmp/out")),
            encrypt_header: true,
            ..Settings::default()
        };
        settings.save(&path).expect("save");
        assert_eq!(Settings::load(&path).expect("load"), settings);
    }

    #[test]
    fn test_install_argv_splits_shell_words() {
        let settings = Settings {
            install_command: "sudo 'apt-get' install -y".to_string(),
            ..Settings::default()
        };
        let argv = settings
            .install_argv(&["p7zip-full".to_string()])
            .expect("argv");
        assert_eq!(argv, vec!["sudo", "apt-get", "install", "-y", "p7zip-full"]);

        let broken = Settings {
            install_command: "sudo \"apt-get".to_string(),
            ..Settings::default()
        };
        assert!(broken.install_argv(&[]).is_err());
    }

    #[test]
    fn test_archive_name_for_files() {
        let settings = Settings::default();
        assert_eq!(
            settings.archive_name_for(&[PathBuf::from("/home/u/report.txt")]),
            Some(PathBuf::from("/home/u/report.tar.gz"))
        );
        assert_eq!(
            settings.archive_name_for(&[
                PathBuf::from("/home/u/photos/a.jpg"),
                PathBuf::from("/home/u/photos/b.jpg"),
            ]),
            Some(PathBuf::from("/home/u/photos/photos.tar.gz"))
        );
        assert_eq!(settings.archive_name_for(&[]), None);
    }
}
