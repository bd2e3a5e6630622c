//! 설치된 명령줄 압축 도구(7z, unrar, tar, zip)를 구동하는 압축 파일 관리자 코어

pub mod core;
pub mod models;
pub mod system;
pub mod utils;
