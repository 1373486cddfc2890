//! 전송 통계

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 세션 단위 송수신 바이트 카운터
///
/// 송신/수신 펌프가 동시에 갱신하고 리포터가 동시에 읽는다.
/// 두 카운터 사이의 갱신 순서는 보장하지 않음.
#[derive(Debug, Default)]
pub struct Stats {
    bytes_sent: AtomicU64,
    bytes_rcvd: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 송신 바이트 누적
    pub fn add_sent(&self, delta: u64) {
        self.bytes_sent.fetch_add(delta, Ordering::Relaxed);
    }

    /// 수신 바이트 누적
    pub fn add_rcvd(&self, delta: u64) {
        self.bytes_rcvd.fetch_add(delta, Ordering::Relaxed);
    }

    /// 총 송신 바이트
    pub fn sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// 총 수신 바이트
    pub fn rcvd(&self) -> u64 {
        self.bytes_rcvd.load(Ordering::Relaxed)
    }

    /// 카운터 리셋
    pub fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_rcvd.store(0, Ordering::Relaxed);
    }
}

/// 리포터가 1초 간격으로 방출하는 구간 통계
#[derive(Debug, Clone, Copy)]
pub struct StatsDiff {
    /// 구간 동안 송신한 바이트
    pub bytes_sent: u64,

    /// 구간 동안 수신한 바이트
    pub bytes_rcvd: u64,

    /// 실제 구간 길이
    pub duration: Duration,
}
