//! 압축 파일 MIME 타입 판별
//!
//! 파일 이름(확장자) 기반 판별과 내용(매직 바이트) 기반 판별을 제공한다.

use std::path::Path;

/// MIME 타입 설명
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MimeTypeDescription {
    pub mime_type: &'static str,
    pub default_extension: &'static str,
    /// 사용자에게 보여줄 형식 이름 (단일 파일 압축 형식 등은 없음)
    pub name: Option<&'static str>,
}

const fn desc(
    mime_type: &'static str,
    default_extension: &'static str,
    name: Option<&'static str>,
) -> MimeTypeDescription {
    MimeTypeDescription {
        mime_type,
        default_extension,
        name,
    }
}

/// 알려진 압축 형식 목록 (지원 형식 표 계산 순서)
pub const MIME_TYPE_DESCRIPTIONS: &[MimeTypeDescription] = &[
    desc("application/x-7z-compressed", ".7z", Some("7-Zip (.7z)")),
    desc("application/x-7z-compressed-tar", ".tar.7z", Some("Tar compressed with 7z (.tar.7z)")),
    desc("application/x-ace", ".ace", Some("Ace (.ace)")),
    desc("application/x-alz", ".alz", None),
    desc("application/x-ar", ".ar", Some("Ar (.ar)")),
    desc("application/x-arj", ".arj", Some("Arj (.arj)")),
    desc("application/x-bzip", ".bz2", None),
    desc("application/x-bzip-compressed-tar", ".tar.bz2", Some("Tar compressed with bzip2 (.tar.bz2)")),
    desc("application/vnd.ms-cab-compressed", ".cab", Some("Cabinet (.cab)")),
    desc("application/x-cbr", ".cbr", Some("Rar Archived Comic Book (.cbr)")),
    desc("application/x-cbz", ".cbz", Some("Zip Archived Comic Book (.cbz)")),
    desc("application/x-cd-image", ".iso", None),
    desc("application/x-compress", ".Z", None),
    desc("application/x-compressed-tar", ".tar.gz", Some("Tar compressed with gzip (.tar.gz)")),
    desc("application/x-cpio", ".cpio", None),
    desc("application/x-deb", ".deb", None),
    desc("application/x-ear", ".ear", Some("Ear (.ear)")),
    desc("application/x-ms-dos-executable", ".exe", Some("Self-extracting zip (.exe)")),
    desc("application/x-gzip", ".gz", None),
    desc("application/x-java-archive", ".jar", Some("Jar (.jar)")),
    desc("application/x-lha", ".lzh", Some("Lha (.lzh)")),
    desc("application/x-lzip", ".lz", None),
    desc("application/x-lzip-compressed-tar", ".tar.lz", Some("Tar compressed with lzip (.tar.lz)")),
    desc("application/x-rar", ".rar", Some("Rar (.rar)")),
    desc("application/x-rpm", ".rpm", None),
    desc("application/x-tar", ".tar", Some("Tar uncompressed (.tar)")),
    desc("application/x-war", ".war", Some("War (.war)")),
    desc("application/x-xz", ".xz", Some("Xz (.xz)")),
    desc("application/x-xz-compressed-tar", ".tar.xz", Some("Tar compressed with xz (.tar.xz)")),
    desc("application/zip", ".zip", Some("Zip (.zip)")),
];

/// 확장자 → MIME 타입
const EXTENSION_TYPES: &[(&str, &str)] = &[
    (".7z", "application/x-7z-compressed"),
    (".ace", "application/x-ace"),
    (".alz", "application/x-alz"),
    (".ar", "application/x-ar"),
    (".arj", "application/x-arj"),
    (".bz2", "application/x-bzip"),
    (".cab", "application/vnd.ms-cab-compressed"),
    (".cbr", "application/x-cbr"),
    (".cbz", "application/x-cbz"),
    (".cpio", "application/x-cpio"),
    (".deb", "application/x-deb"),
    (".ear", "application/x-ear"),
    (".exe", "application/x-ms-dos-executable"),
    (".gz", "application/x-gzip"),
    (".iso", "application/x-cd-image"),
    (".jar", "application/x-java-archive"),
    (".lha", "application/x-lha"),
    (".lzh", "application/x-lha"),
    (".lz", "application/x-lzip"),
    (".rar", "application/x-rar"),
    (".rpm", "application/x-rpm"),
    (".tar", "application/x-tar"),
    (".tar.7z", "application/x-7z-compressed-tar"),
    (".tar.bz2", "application/x-bzip-compressed-tar"),
    (".tar.gz", "application/x-compressed-tar"),
    (".tar.lz", "application/x-lzip-compressed-tar"),
    (".tar.xz", "application/x-xz-compressed-tar"),
    (".tbz", "application/x-bzip-compressed-tar"),
    (".tbz2", "application/x-bzip-compressed-tar"),
    (".tgz", "application/x-compressed-tar"),
    (".tlz", "application/x-lzip-compressed-tar"),
    (".txz", "application/x-xz-compressed-tar"),
    (".war", "application/x-war"),
    (".xz", "application/x-xz"),
    (".z", "application/x-gzip"),
    (".Z", "application/x-compress"),
    (".zip", "application/zip"),
];

/// 파일 이름에서 압축 형식 확장자 찾기 (가장 긴 일치 우선)
///
/// `.Z`/`.z`만 대소문자를 구분하고 나머지는 구분하지 않는다.
pub fn archive_extension(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    EXTENSION_TYPES
        .iter()
        .filter(|(ext, _)| {
            if ext.eq_ignore_ascii_case(".z") && ext.len() == 2 {
                name.ends_with(ext)
            } else {
                lower.ends_with(&ext.to_lowercase())
            }
        })
        .filter(|(ext, _)| name.len() > ext.len())
        .max_by_key(|(ext, _)| ext.len())
        .map(|(ext, _)| *ext)
}

/// 파일 이름으로 MIME 타입 판별
pub fn mime_type_from_name(name: &str) -> Option<&'static str> {
    let ext = archive_extension(name)?;
    EXTENSION_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, mime)| *mime)
}

/// 경로의 파일 이름으로 MIME 타입 판별
pub fn mime_type_from_path(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_string_lossy();
    mime_type_from_name(&name)
}

/// 파일 내용으로 MIME 타입 판별
///
/// `infer`가 돌려주는 이름을 이 목록의 이름으로 맞춘다.
pub fn mime_type_from_content(path: &Path) -> Option<&'static str> {
    let kind = infer::get_from_path(path).ok().flatten()?;
    let mime = match kind.mime_type() {
        "application/vnd.rar" | "application/x-rar-compressed" => "application/x-rar",
        "application/gzip" => "application/x-gzip",
        "application/x-bzip2" => "application/x-bzip",
        "application/x-7z-compressed" => "application/x-7z-compressed",
        "application/zip" => "application/zip",
        "application/x-tar" => "application/x-tar",
        "application/x-xz" => "application/x-xz",
        "application/x-lzip" => "application/x-lzip",
        "application/vnd.ms-cab-compressed" => "application/vnd.ms-cab-compressed",
        "application/x-rpm" => "application/x-rpm",
        "application/vnd.debian.binary-package" => "application/x-deb",
        "application/x-compress" => "application/x-compress",
        "application/java-archive" => "application/x-java-archive",
        "application/x-msdownload" => "application/x-ms-dos-executable",
        "application/x-iso9660-image" => "application/x-cd-image",
        other => {
            log::warn!("mime type not recognized: {}", other);
            return None;
        }
    };
    Some(mime)
}

/// MIME 타입 설명 조회
pub fn describe(mime_type: &str) -> Option<&'static MimeTypeDescription> {
    MIME_TYPE_DESCRIPTIONS
        .iter()
        .find(|d| d.mime_type == mime_type)
}

/// 압축 형식 확장자를 제거한 파일 이름 (없으면 원래 이름)
pub fn strip_archive_extension(name: &str) -> &str {
    match archive_extension(name) {
        Some(ext) => &name[..name.len() - ext.len()],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_mime_type_from_name_prefers_longest_extension() {
        assert_eq!(
            mime_type_from_name("backup.tar.gz"),
            Some("application/x-compressed-tar")
        );
        assert_eq!(mime_type_from_name("notes.gz"), Some("application/x-gzip"));
        assert_eq!(
            mime_type_from_name("Photos.TAR.BZ2"),
            Some("application/x-bzip-compressed-tar")
        );
        assert_eq!(mime_type_from_name("a.7z"), Some("application/x-7z-compressed"));
        assert_eq!(mime_type_from_name("a.cbr"), Some("application/x-cbr"));
        assert_eq!(mime_type_from_name("readme.txt"), None);
        assert_eq!(mime_type_from_name(".zip"), None);
    }

    #[test]
    fn test_z_extension_is_case_sensitive() {
        assert_eq!(mime_type_from_name("old.Z"), Some("application/x-compress"));
        assert_eq!(mime_type_from_name("old.z"), Some("application/x-gzip"));
    }

    #[test]
    fn test_strip_archive_extension() {
        assert_eq!(strip_archive_extension("photos.tar.xz"), "photos");
        assert_eq!(strip_archive_extension("photos.zip"), "photos");
        assert_eq!(strip_archive_extension("photos"), "photos");
    }

    #[test]
    fn test_describe_known_type() {
        let d = describe("application/x-rar").expect("rar description");
        assert_eq!(d.default_extension, ".rar");
        assert!(describe("application/x-unknown").is_none());
    }

    #[test]
    fn test_mime_type_from_content_sniffs_zip_with_wrong_name() {
        let temp = tempdir().expect("create tempdir");
        let path = temp.path().join("archive.bin");
        // 빈 zip (End of central directory 레코드만 있음)
        let mut data = vec![0x50, 0x4B, 0x05, 0x06];
        data.extend_from_slice(&[0u8; 18]);
        fs::write(&path, &data).expect("write zip bytes");
        assert_eq!(mime_type_from_content(&path), Some("application/zip"));
        assert_eq!(mime_type_from_path(&path), None);
    }
}
