//! 에러 타입 정의

use thiserror::Error;

/// FLO 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 매직 바이트")]
    InvalidMagic,

    #[error("유효하지 않은 패킷 크기: expected {expected}, got {got}")]
    InvalidPacketSize { expected: usize, got: usize },

    #[error("지원하지 않는 프로토콜 버전: {got}")]
    UnsupportedVersion { got: u8 },

    #[error("패킷 타입 불일치: expected {expected}, got {got}")]
    IncorrectType { expected: u8, got: u8 },

    #[error("지원하지 않는 전송 계층: {0}")]
    UnsupportedTransport(u8),

    #[error("지원하지 않는 보안 계층: {0}")]
    UnsupportedSecurity(u8),

    #[error("지원하지 않는 전송 방향: {0}")]
    UnsupportedDirection(u8),

    #[error("지원하지 않는 인증 방식: {0}")]
    UnsupportedAuthMethod(u8),

    #[error("유효하지 않은 플래그: {0:#06x}")]
    InvalidFlags(u16),

    #[error("유효하지 않은 청크 크기: {0}")]
    InvalidChunkSize(u32),

    #[error("유효하지 않은 측정 시간: {0}ms")]
    InvalidDuration(u64),

    #[error("유효하지 않은 nonce")]
    InvalidNonce,

    #[error("인증 실패: PSK 불일치")]
    AuthFailed,

    #[error("서버 혼잡: 동시 측정 한도 초과")]
    Busy,

    #[error("컨트롤 플레인 타임아웃")]
    Timeout,

    #[error("예상하지 못한 ACK 코드: {0}")]
    UnexpectedAckCode(u8),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
