//! 외부 도구 설치 여부 확인

use std::collections::HashSet;

/// PATH에서 실행 파일을 찾는 협력자
pub trait ToolLocator {
    fn tool_available_on_path(&self, name: &str) -> bool;

    /// 후보 중 처음으로 설치된 도구
    fn first_available<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates
            .iter()
            .copied()
            .find(|name| self.tool_available_on_path(name))
    }
}

/// 실제 PATH 검색 (`which` 크레이트)
#[derive(Debug, Clone, Copy, Default)]
pub struct PathToolLocator;

impl ToolLocator for PathToolLocator {
    fn tool_available_on_path(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// 모든 도구가 설치 가능하다고 가정 (잠재 능력 계산용)
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeInstalled;

impl ToolLocator for AssumeInstalled {
    fn tool_available_on_path(&self, _name: &str) -> bool {
        true
    }
}

/// 고정된 도구 목록 (테스트, 오프라인 환경용)
#[derive(Debug, Clone, Default)]
pub struct StaticToolLocator {
    tools: HashSet<String>,
}

impl StaticToolLocator {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.tools.insert(name.into());
    }
}

impl ToolLocator for StaticToolLocator {
    fn tool_available_on_path(&self, name: &str) -> bool {
        self.tools.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_available_respects_candidate_order() {
        let tools = StaticToolLocator::new(["7za", "7zr"]);
        assert_eq!(tools.first_available(&["7z", "7za", "7zr"]), Some("7za"));
        assert_eq!(tools.first_available(&["rar", "unrar"]), None);
    }

    #[test]
    fn test_assume_installed_accepts_everything() {
        assert!(AssumeInstalled.tool_available_on_path("anything"));
        assert_eq!(AssumeInstalled.first_available(&["7z", "7za"]), Some("7z"));
    }

    #[cfg(unix)]
    #[test]
    fn test_path_locator_finds_sh() {
        assert!(PathToolLocator.tool_available_on_path("sh"));
        assert!(!PathToolLocator.tool_available_on_path("bokslarc-no-such-tool-hopefully"));
    }
}
