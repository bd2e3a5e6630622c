use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

/// 백엔드가 특정 MIME 타입에 대해 제공하는 기능 집합
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const READ: Capabilities = Capabilities(1 << 0);
    pub const WRITE: Capabilities = Capabilities(1 << 1);
    pub const ARCHIVE_MANY_FILES: Capabilities = Capabilities(1 << 2);
    pub const ENCRYPT: Capabilities = Capabilities(1 << 3);
    pub const ENCRYPT_HEADER: Capabilities = Capabilities(1 << 4);
    pub const CREATE_VOLUMES: Capabilities = Capabilities(1 << 5);

    /// 읽기/쓰기를 포함한 전체 기능
    pub const READ_WRITE: Capabilities = Capabilities(Self::READ.0 | Self::WRITE.0);

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `other`의 모든 비트를 포함하는지 (상위 집합 검사)
    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// 읽기와 쓰기를 모두 지원하는지
    pub const fn is_read_write(self) -> bool {
        self.contains(Self::READ_WRITE)
    }

    pub fn remove(&mut self, other: Capabilities) {
        self.0 &= !other.0;
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Capabilities {
    type Output = Capabilities;

    fn bitand(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 & rhs.0)
    }
}

impl Sub for Capabilities {
    type Output = Capabilities;

    fn sub(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 & !rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Capabilities, &str); 6] = [
            (Capabilities::READ, "READ"),
            (Capabilities::WRITE, "WRITE"),
            (Capabilities::ARCHIVE_MANY_FILES, "ARCHIVE_MANY_FILES"),
            (Capabilities::ENCRYPT, "ENCRYPT"),
            (Capabilities::ENCRYPT_HEADER, "ENCRYPT_HEADER"),
            (Capabilities::CREATE_VOLUMES, "CREATE_VOLUMES"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(cap, _)| self.contains(*cap))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_superset_check() {
        let caps = Capabilities::READ | Capabilities::WRITE | Capabilities::ENCRYPT;
        assert!(caps.contains(Capabilities::READ));
        assert!(caps.contains(Capabilities::READ | Capabilities::ENCRYPT));
        assert!(!caps.contains(Capabilities::READ | Capabilities::CREATE_VOLUMES));
        assert!(caps.contains(Capabilities::NONE));
    }

    #[test]
    fn test_remove_and_sub() {
        let mut caps = Capabilities::READ | Capabilities::WRITE;
        assert!(caps.is_read_write());
        caps.remove(Capabilities::WRITE);
        assert_eq!(caps, Capabilities::READ);
        assert_eq!(
            (Capabilities::READ_WRITE | Capabilities::ENCRYPT) - Capabilities::WRITE,
            Capabilities::READ | Capabilities::ENCRYPT
        );
    }

    #[test]
    fn test_debug_lists_flag_names() {
        assert_eq!(format!("{:?}", Capabilities::NONE), "NONE");
        assert_eq!(
            format!("{:?}", Capabilities::READ | Capabilities::CREATE_VOLUMES),
            "READ|CREATE_VOLUMES"
        );
    }
}
