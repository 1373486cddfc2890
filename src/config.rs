//! 서버/클라이언트 설정

use std::time::Duration;

use crate::packet::{Direction, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, MIN_DURATION_MS};
use crate::{Error, Result};

/// 기본 컨트롤 플레인 타임아웃
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// 기본 측정 시간
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// 기본 워밍업 시간
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(1);

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: u32 = 1024;

/// TCP 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 리스닝 호스트 (DNS 이름 또는 IP)
    pub host: String,

    /// 리스닝 포트
    pub port: u16,

    /// HMAC 인증용 사전 공유 키 (비어 있으면 인증 비활성)
    pub psk: Vec<u8>,

    /// 컨트롤 플레인 read/write 타임아웃 (0이면 기본값 사용)
    pub timeout: Duration,

    /// 동시 측정 세션 한도 (최소 1)
    pub max_concurrent_tests: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            psk: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            max_concurrent_tests: 1,
        }
    }
}

/// 측정 세션 옵션 (클라이언트)
#[derive(Debug, Clone)]
pub struct RunOpts {
    /// 데이터 흐름 방향
    pub direction: Direction,

    /// 측정 시간 (워밍업 제외)
    pub duration: Duration,

    /// 워밍업 시간 (이 구간의 바이트는 집계 제외)
    pub warmup: Duration,

    /// 청크 크기 (바이트)
    pub chunk_size: u32,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            direction: Direction::Bidi,
            duration: DEFAULT_DURATION,
            warmup: DEFAULT_WARMUP,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl RunOpts {
    /// HELLO로 내보내기 전에 와이어 범위 검증
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::InvalidChunkSize(self.chunk_size));
        }

        let duration_ms = self.duration.as_millis() as u64;
        if duration_ms < MIN_DURATION_MS {
            return Err(Error::InvalidDuration(duration_ms));
        }

        Ok(())
    }
}
