//! 세션 ID / nonce 생성과 로그 표시용 단위 변환

use std::time::Duration;

use rand::RngCore;
use ulid::Ulid;

const KB: f64 = 1e3;
const MB: f64 = 1e6;
const GB: f64 = 1e9;

/// 새 세션 ID 생성 (ULID: 48비트 ms 타임스탬프 + 80비트 랜덤)
pub fn new_session_id() -> Ulid {
    Ulid::new()
}

/// 16바이트 랜덤 nonce 생성
pub fn new_nonce() -> [u8; 16] {
    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// 바이트 수를 십진 단위로 표시
pub fn display_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// 구간 전송량을 bits/sec 단위로 표시
pub fn display_bits_per_sec(bytes: u64, duration: Duration) -> String {
    if duration.is_zero() {
        return "0 bps".to_string();
    }

    let bps = bytes as f64 / duration.as_secs_f64() * 8.0;
    if bps >= GB {
        format!("{:.2} Gbps", bps / GB)
    } else if bps >= MB {
        format!("{:.2} Mbps", bps / MB)
    } else if bps >= KB {
        format!("{:.2} Kbps", bps / KB)
    } else {
        format!("{:.2} bps", bps)
    }
}

/// 시간을 초 단위로 표시
pub fn display_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}
