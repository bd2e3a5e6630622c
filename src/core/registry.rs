//! 압축 형식 드라이버 등록부
//!
//! 등록 순서가 우선순위다. 드라이버마다 MIME 타입별로 지금 제공 가능한
//! 능력(설치된 도구 기준)과 잠재 능력(모든 도구가 설치 가능하다고 가정)을
//! 보관한다. 패키지 설치 후에는 [`BackendRegistry::refresh`]로 다시 계산한다.

use crate::core::backends::{default_backends, ArchiveBackend};
use crate::models::Capabilities;
use crate::system::mime::MIME_TYPE_DESCRIPTIONS;
use crate::system::{AssumeInstalled, ToolLocator};

/// MIME 타입 하나에 대한 능력
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCapabilities {
    pub mime_type: &'static str,
    pub current: Capabilities,
    pub potential: Capabilities,
    pub packages: Option<&'static str>,
}

/// 등록된 드라이버와 계산된 능력표
pub struct RegisteredBackend {
    backend: Box<dyn ArchiveBackend>,
    formats: Vec<FormatCapabilities>,
}

impl RegisteredBackend {
    fn new(backend: Box<dyn ArchiveBackend>, tools: &dyn ToolLocator) -> Self {
        let mut registered = Self {
            backend,
            formats: Vec::new(),
        };
        registered.recompute(tools);
        registered
    }

    fn recompute(&mut self, tools: &dyn ToolLocator) {
        let backend = &self.backend;
        self.formats = backend
            .mime_types()
            .iter()
            .map(|&mime| FormatCapabilities {
                mime_type: mime,
                current: backend.capabilities(mime, tools),
                potential: backend.capabilities(mime, &AssumeInstalled),
                packages: backend.packages(mime),
            })
            .collect();
    }

    pub fn id(&self) -> &'static str {
        self.backend.id()
    }

    pub fn backend(&self) -> &dyn ArchiveBackend {
        self.backend.as_ref()
    }

    pub fn formats(&self) -> &[FormatCapabilities] {
        &self.formats
    }

    fn format(&self, mime_type: &str) -> Option<&FormatCapabilities> {
        self.formats.iter().find(|f| f.mime_type == mime_type)
    }

    /// 설치된 도구로 지금 제공 가능한 능력
    pub fn current(&self, mime_type: &str) -> Capabilities {
        self.format(mime_type)
            .map(|f| f.current)
            .unwrap_or(Capabilities::NONE)
    }

    /// 패키지를 설치하면 제공 가능한 능력
    pub fn potential(&self, mime_type: &str) -> Capabilities {
        self.format(mime_type)
            .map(|f| f.potential)
            .unwrap_or(Capabilities::NONE)
    }
}

/// 우선순위 순서의 드라이버 목록
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<RegisteredBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본 드라이버 (tar, 7z, rar, zip 순)
    pub fn with_default_backends(tools: &dyn ToolLocator) -> Self {
        let mut registry = Self::new();
        for backend in default_backends() {
            registry.register(backend, tools);
        }
        registry
    }

    /// 목록 끝에 추가 (먼저 등록한 드라이버가 우선)
    pub fn register(&mut self, backend: Box<dyn ArchiveBackend>, tools: &dyn ToolLocator) {
        let registered = RegisteredBackend::new(backend, tools);
        log::debug!(
            "registry: registered {} ({} mime types)",
            registered.id(),
            registered.formats.len()
        );
        self.backends.push(registered);
    }

    /// 도구 설치 여부를 다시 확인해 현재 능력 갱신
    pub fn refresh(&mut self, tools: &dyn ToolLocator) {
        for backend in &mut self.backends {
            backend.recompute(tools);
        }
        log::info!("registry: capabilities refreshed");
    }

    pub fn backends(&self) -> impl Iterator<Item = &RegisteredBackend> {
        self.backends.iter()
    }

    pub fn find(&self, id: &str) -> Option<&RegisteredBackend> {
        self.backends.iter().find(|b| b.id() == id)
    }

    /// 현재 능력이 `required`를 포함하는 드라이버
    pub fn resolve(&self, mime_type: &str, required: Capabilities) -> Option<&RegisteredBackend> {
        self.resolve_by(mime_type, required, RegisteredBackend::current)
    }

    /// 잠재 능력이 `required`를 포함하는 드라이버
    pub fn resolve_potential(
        &self,
        mime_type: &str,
        required: Capabilities,
    ) -> Option<&RegisteredBackend> {
        self.resolve_by(mime_type, required, RegisteredBackend::potential)
    }

    /// 후보 중 읽기/쓰기를 모두 제공하는 드라이버가 읽기 전용 드라이버보다 우선.
    /// 같은 조건이면 먼저 등록한 드라이버.
    fn resolve_by(
        &self,
        mime_type: &str,
        required: Capabilities,
        caps_of: fn(&RegisteredBackend, &str) -> Capabilities,
    ) -> Option<&RegisteredBackend> {
        let mut fallback = None;
        for backend in &self.backends {
            let caps = caps_of(backend, mime_type);
            if caps.is_empty() || !caps.contains(required) {
                continue;
            }
            if caps.is_read_write() {
                return Some(backend);
            }
            if fallback.is_none() {
                fallback = Some(backend);
            }
        }
        fallback
    }

    /// 모든 드라이버의 현재 능력 합
    pub fn capabilities_for(&self, mime_type: &str) -> Capabilities {
        self.backends
            .iter()
            .fold(Capabilities::NONE, |acc, b| acc | b.current(mime_type))
    }

    /// `mime_type`을 다루는 데 필요한 OS 패키지
    ///
    /// 잠재적으로 읽기/쓰기를 제공하는 드라이버가 있으면 그 패키지를 고른다.
    pub fn packages_for(&self, mime_type: &str) -> Vec<String> {
        let provider = self
            .resolve_potential(mime_type, Capabilities::READ)
            .or_else(|| self.resolve_potential(mime_type, Capabilities::NONE));
        provider
            .and_then(|b| b.format(mime_type))
            .and_then(|f| f.packages)
            .map(|packages| {
                packages
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn types_where(&self, keep: impl Fn(Capabilities) -> bool) -> Vec<&'static str> {
        MIME_TYPE_DESCRIPTIONS
            .iter()
            .map(|d| d.mime_type)
            .filter(|mime| keep(self.capabilities_for(mime)))
            .collect()
    }

    /// 열 수 있는 형식
    pub fn open_types(&self) -> Vec<&'static str> {
        self.types_where(|caps| caps.contains(Capabilities::READ))
    }

    /// 여러 파일을 담아 저장할 수 있는 형식
    pub fn save_types(&self) -> Vec<&'static str> {
        self.types_where(|caps| {
            caps.contains(Capabilities::WRITE | Capabilities::ARCHIVE_MANY_FILES)
        })
    }

    /// 새로 만들 수 있는 형식
    pub fn create_types(&self) -> Vec<&'static str> {
        self.save_types()
    }

    /// 단일 파일이라도 쓸 수 있는 형식
    pub fn single_file_save_types(&self) -> Vec<&'static str> {
        self.types_where(|caps| caps.contains(Capabilities::WRITE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backends::{ArchiveContext, BackendProperties};
    use crate::models::{AddRequest, ExtractRequest};
    use crate::system::{ProcessRunner, StaticToolLocator};

    /// 도구 이름 하나에 능력이 고정된 가짜 드라이버
    struct FakeBackend {
        id: &'static str,
        mime: &'static [&'static str],
        tool: &'static str,
        caps: Capabilities,
    }

    impl ArchiveBackend for FakeBackend {
        fn id(&self) -> &'static str {
            self.id
        }
        fn mime_types(&self) -> &'static [&'static str] {
            self.mime
        }
        fn capabilities(&self, mime_type: &str, tools: &dyn ToolLocator) -> Capabilities {
            if self.mime.contains(&mime_type) && tools.tool_available_on_path(self.tool) {
                self.caps
            } else {
                Capabilities::NONE
            }
        }
        fn packages(&self, _mime_type: &str) -> Option<&'static str> {
            Some(self.tool)
        }
        fn properties(&self) -> BackendProperties {
            BackendProperties::default()
        }
        fn list(&self, _ctx: &ArchiveContext<'_>, _runner: &mut ProcessRunner) {}
        fn add(&self, _ctx: &ArchiveContext<'_>, _r: &AddRequest, _runner: &mut ProcessRunner) {}
        fn delete(&self, _ctx: &ArchiveContext<'_>, _f: &[String], _runner: &mut ProcessRunner) {}
        fn extract(
            &self,
            _ctx: &ArchiveContext<'_>,
            _r: &ExtractRequest,
            _total: usize,
            _runner: &mut ProcessRunner,
        ) {
        }
        fn test(&self, _ctx: &ArchiveContext<'_>, _runner: &mut ProcessRunner) {}
    }

    const M: &str = "application/x-test";

    fn fake(id: &'static str, tool: &'static str, caps: Capabilities) -> Box<dyn ArchiveBackend> {
        Box::new(FakeBackend {
            id,
            mime: &[M],
            tool,
            caps,
        })
    }

    fn all_requests() -> Vec<Capabilities> {
        let bits = [
            Capabilities::READ,
            Capabilities::WRITE,
            Capabilities::ARCHIVE_MANY_FILES,
            Capabilities::ENCRYPT,
            Capabilities::ENCRYPT_HEADER,
            Capabilities::CREATE_VOLUMES,
        ];
        (0u32..(1 << bits.len()))
            .map(|mask| {
                bits.iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .fold(Capabilities::NONE, |acc, (_, b)| acc | *b)
            })
            .collect()
    }

    #[test]
    fn test_resolve_result_always_satisfies_request() {
        let tools = StaticToolLocator::new(["a", "b", "c"]);
        let mut registry = BackendRegistry::new();
        registry.register(fake("ro", "a", Capabilities::READ), &tools);
        registry.register(
            fake(
                "rw-enc",
                "b",
                Capabilities::READ_WRITE | Capabilities::ENCRYPT,
            ),
            &tools,
        );
        registry.register(
            fake(
                "volumes",
                "c",
                Capabilities::READ | Capabilities::CREATE_VOLUMES,
            ),
            &tools,
        );

        for required in all_requests() {
            let resolved = registry.resolve(M, required);
            let any_satisfies = registry
                .backends()
                .any(|b| !b.current(M).is_empty() && b.current(M).contains(required));
            match resolved {
                Some(backend) => assert!(
                    backend.current(M).contains(required),
                    "{} does not satisfy {:?}",
                    backend.id(),
                    required
                ),
                None => assert!(!any_satisfies, "no result for {:?}", required),
            }
        }
        assert!(registry.resolve("application/x-other", Capabilities::READ).is_none());
    }

    #[test]
    fn test_read_write_outranks_earlier_read_only() {
        let tools = StaticToolLocator::new(["a", "b"]);
        let mut registry = BackendRegistry::new();
        registry.register(fake("A", "a", Capabilities::READ), &tools);
        registry.register(fake("B", "b", Capabilities::READ_WRITE), &tools);

        assert_eq!(
            registry.resolve(M, Capabilities::WRITE).map(|b| b.id()),
            Some("B")
        );
        assert_eq!(
            registry.resolve(M, Capabilities::READ).map(|b| b.id()),
            Some("B")
        );
    }

    #[test]
    fn test_registration_order_breaks_remaining_ties() {
        let tools = StaticToolLocator::new(["a", "b"]);
        let mut registry = BackendRegistry::new();
        registry.register(fake("first", "a", Capabilities::READ), &tools);
        registry.register(fake("second", "b", Capabilities::READ), &tools);
        assert_eq!(
            registry.resolve(M, Capabilities::READ).map(|b| b.id()),
            Some("first")
        );
    }

    #[test]
    fn test_potential_and_refresh() {
        let mut tools = StaticToolLocator::new(["a"]);
        let mut registry = BackendRegistry::new();
        registry.register(fake("A", "a", Capabilities::READ), &tools);
        registry.register(fake("B", "b", Capabilities::READ_WRITE), &tools);

        assert!(registry.resolve(M, Capabilities::WRITE).is_none());
        assert_eq!(
            registry
                .resolve_potential(M, Capabilities::WRITE)
                .map(|b| b.id()),
            Some("B")
        );
        assert_eq!(registry.packages_for(M), vec!["b".to_string()]);

        tools.insert("b");
        registry.refresh(&tools);
        assert_eq!(
            registry.resolve(M, Capabilities::WRITE).map(|b| b.id()),
            Some("B")
        );
        assert!(registry
            .capabilities_for(M)
            .contains(Capabilities::READ_WRITE));
    }

    #[test]
    fn test_default_backends_prefer_writable_driver() {
        // unrar만 있을 때 rar는 7z(읽기)와 unrar(읽기) 중 먼저 등록된 7z
        let tools = StaticToolLocator::new(["7z", "unrar", "tar", "gzip"]);
        let registry = BackendRegistry::with_default_backends(&tools);
        assert_eq!(
            registry
                .resolve("application/x-rar", Capabilities::READ)
                .map(|b| b.id()),
            Some("7z")
        );

        // rar가 설치되면 쓰기 가능한 rar 드라이버가 우선
        let tools = StaticToolLocator::new(["7z", "rar"]);
        let registry = BackendRegistry::with_default_backends(&tools);
        assert_eq!(
            registry
                .resolve("application/x-rar", Capabilities::READ)
                .map(|b| b.id()),
            Some("rar")
        );
    }

    #[test]
    fn test_supported_type_tables() {
        let tools = StaticToolLocator::new(["tar", "gzip", "unzip"]);
        let registry = BackendRegistry::with_default_backends(&tools);

        let open = registry.open_types();
        assert!(open.contains(&"application/x-compressed-tar"));
        assert!(open.contains(&"application/zip"));
        assert!(!open.contains(&"application/x-7z-compressed"));

        let create = registry.create_types();
        assert!(create.contains(&"application/x-tar"));
        assert!(!create.contains(&"application/zip"));
        assert_eq!(registry.save_types(), create);
        assert!(registry
            .single_file_save_types()
            .contains(&"application/x-compressed-tar"));
    }
}
