//! 인증 프리미티브
//!
//! AuthHash = HMAC_SHA256(key = PSK, message = HELLO_BYTES || SERVER_NONCE)
//!
//! 서버는 재마샬링한 HELLO를 신뢰하지 않고, 와이어에서 수신한 바이트를
//! 그대로 해시 입력으로 쓴다. 클라이언트도 자신이 실제로 보낸 바이트를 쓴다.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 인증 해시 크기 (바이트)
pub const AUTH_HASH_SIZE: usize = 32;

fn keyed_mac(hello_bytes: &[u8], server_nonce: &[u8; 16], psk: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(psk).expect("HMAC accepts any key length");
    mac.update(hello_bytes);
    mac.update(server_nonce);
    mac
}

/// 수신한 HELLO 바이트와 서버 nonce로 인증 해시 계산
pub fn compute_auth_hash(
    hello_bytes: &[u8],
    server_nonce: &[u8; 16],
    psk: &[u8],
) -> [u8; AUTH_HASH_SIZE] {
    let mut hash = [0u8; AUTH_HASH_SIZE];
    hash.copy_from_slice(&keyed_mac(hello_bytes, server_nonce, psk).finalize().into_bytes());
    hash
}

/// 수신한 인증 해시 검증 (상수 시간 비교)
pub fn verify_auth_hash(
    hello_bytes: &[u8],
    server_nonce: &[u8; 16],
    psk: &[u8],
    received: &[u8; AUTH_HASH_SIZE],
) -> bool {
    // Mac::verify_slice가 상수 시간 비교를 보장함
    keyed_mac(hello_bytes, server_nonce, psk)
        .verify_slice(received)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Vec<u8>, [u8; 16], Vec<u8>) {
        let hello: Vec<u8> = (0..63u8).collect();
        let nonce = [0x5A; 16];
        let psk = b"secret".to_vec();
        (hello, nonce, psk)
    }

    #[test]
    fn test_compute_then_verify() {
        let (hello, nonce, psk) = fixture();
        let hash = compute_auth_hash(&hello, &nonce, &psk);
        assert!(verify_auth_hash(&hello, &nonce, &psk, &hash));
    }

    #[test]
    fn test_any_hello_bit_flip_fails() {
        let (hello, nonce, psk) = fixture();
        let hash = compute_auth_hash(&hello, &nonce, &psk);

        for bit in 0..hello.len() * 8 {
            let mut flipped = hello.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify_auth_hash(&flipped, &nonce, &psk, &hash));
        }
    }

    #[test]
    fn test_any_nonce_bit_flip_fails() {
        let (hello, nonce, psk) = fixture();
        let hash = compute_auth_hash(&hello, &nonce, &psk);

        for bit in 0..128 {
            let mut flipped = nonce;
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify_auth_hash(&hello, &flipped, &psk, &hash));
        }
    }

    #[test]
    fn test_any_psk_bit_flip_fails() {
        let (hello, nonce, psk) = fixture();
        let hash = compute_auth_hash(&hello, &nonce, &psk);

        for bit in 0..psk.len() * 8 {
            let mut flipped = psk.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify_auth_hash(&hello, &nonce, &flipped, &hash));
        }
    }

    #[test]
    fn test_any_hash_bit_flip_fails() {
        let (hello, nonce, psk) = fixture();
        let hash = compute_auth_hash(&hello, &nonce, &psk);

        for bit in 0..256 {
            let mut flipped = hash;
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(!verify_auth_hash(&hello, &nonce, &psk, &flipped));
        }
    }

    #[test]
    fn test_empty_psk_still_hashes() {
        // 인증 비활성 판단은 상태 머신의 몫이고, 해시 자체는 빈 키도 허용
        let (hello, nonce, _) = fixture();
        let hash = compute_auth_hash(&hello, &nonce, b"");
        assert!(verify_auth_hash(&hello, &nonce, b"", &hash));
    }
}
