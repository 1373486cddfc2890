//! TCP 클라이언트와 클라이언트측 세션 상태 머신
//!
//! dial → hello → (선택) 챌린지/응답 → ack → 데이터 페이즈.
//! 인증 해시는 실제로 송신한 HELLO 바이트를 그대로 입력으로 쓴다.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info};
use ulid::Ulid;

use crate::auth;
use crate::config::{RunOpts, DEFAULT_TIMEOUT};
use crate::packet::{
    AckCode, AckPacket, AnswerPacket, ChallengePacket, Direction, Header, HelloPacket, PacketType,
    Security, Transport, ACK_SIZE, CHALLENGE_SIZE, HEADER_SIZE,
};
use crate::stats::Stats;
use crate::transfer;
use crate::util;
use crate::{Error, Result};

/// 측정 세션 결과 요약
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// 세션 식별자
    pub session_id: Ulid,

    /// 측정 구간 동안 송신한 바이트
    pub bytes_sent: u64,

    /// 측정 구간 동안 수신한 바이트
    pub bytes_rcvd: u64,

    /// 요청한 측정 시간 (평균 계산 기준)
    pub duration: Duration,
}

/// FLO TCP 클라이언트
pub struct TcpClient {
    host: String,
    port: u16,
    psk: Vec<u8>,
    timeout: Duration,
}

impl TcpClient {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        psk: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            psk,
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }

    /// 측정 세션 하나를 실행하고 최종 집계를 반환
    pub async fn run(&self, opts: RunOpts, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        opts.validate()?;

        let conn = timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await??;
        let (mut r, mut w) = conn.into_split();

        let session_id = util::new_session_id();
        let hello = HelloPacket::new(
            session_id,
            Transport::Tcp,
            Security::None,
            opts.direction,
            opts.chunk_size,
            opts.duration,
            opts.warmup,
        );

        // 챌린지 응답이 이 바이트들을 그대로 해시하므로 보관
        let hello_buf = hello.encode();
        timeout(self.timeout, w.write_all(&hello_buf)).await??;
        debug!(session_id = %session_id, "hello sent");

        let (header, header_buf) = self.recv_header(&mut r).await?;

        let ack = if header.packet_type == PacketType::Challenge as u8 {
            let challenge = self.recv_challenge(&mut r, &header_buf).await?;
            debug!(session_id = %session_id, "challenge received");

            let hash = auth::compute_auth_hash(&hello_buf, &challenge.server_nonce, &self.psk);
            let answer = AnswerPacket::new(session_id, hash);
            timeout(self.timeout, w.write_all(&answer.encode())).await??;
            debug!(session_id = %session_id, "answer sent");

            let (header, header_buf) = self.recv_header(&mut r).await?;
            if header.packet_type != PacketType::Ack as u8 {
                return Err(Error::IncorrectType {
                    expected: PacketType::Ack as u8,
                    got: header.packet_type,
                });
            }
            self.recv_ack(&mut r, &header_buf).await?
        } else if header.packet_type == PacketType::Ack as u8 {
            self.recv_ack(&mut r, &header_buf).await?
        } else {
            return Err(Error::IncorrectType {
                expected: PacketType::Ack as u8,
                got: header.packet_type,
            });
        };

        match ack.code {
            AckCode::Ok => {}
            AckCode::AuthFailed => return Err(Error::AuthFailed),
            AckCode::Busy => return Err(Error::Busy),
            other => return Err(Error::UnexpectedAckCode(other as u8)),
        }

        info!(session_id = %session_id, "connected, beginning throughput test");

        let stats = Arc::new(Stats::new());

        // 클라이언트측 방향 매핑: 업로드는 송신만, 다운로드는 수신만
        let (read, write) = match opts.direction {
            Direction::Bidi => (Some(r), Some(w)),
            Direction::Upload => (None, Some(w)),
            Direction::Download => (Some(r), None),
        };

        transfer::transfer(
            read,
            write,
            opts.chunk_size,
            opts.duration,
            opts.warmup,
            stats.clone(),
            shutdown,
        )
        .await;

        // 관례상 평균은 요청한 측정 시간을 기준으로 계산함
        let summary = RunSummary {
            session_id,
            bytes_sent: stats.sent(),
            bytes_rcvd: stats.rcvd(),
            duration: opts.duration,
        };
        info!(
            session_id = %session_id,
            total_sent = %util::display_bytes(summary.bytes_sent),
            avg_sent = %util::display_bits_per_sec(summary.bytes_sent, summary.duration),
            total_rcvd = %util::display_bytes(summary.bytes_rcvd),
            avg_rcvd = %util::display_bits_per_sec(summary.bytes_rcvd, summary.duration),
            "data transfer complete",
        );

        Ok(summary)
    }

    async fn recv_header(&self, r: &mut OwnedReadHalf) -> Result<(Header, [u8; HEADER_SIZE])> {
        let mut buf = [0u8; HEADER_SIZE];
        timeout(self.timeout, r.read_exact(&mut buf)).await??;

        let header = Header::decode(&buf)?;
        Ok((header, buf))
    }

    async fn recv_challenge(
        &self,
        r: &mut OwnedReadHalf,
        header_buf: &[u8; HEADER_SIZE],
    ) -> Result<ChallengePacket> {
        let mut buf = vec![0u8; CHALLENGE_SIZE];
        buf[..HEADER_SIZE].copy_from_slice(header_buf);
        timeout(self.timeout, r.read_exact(&mut buf[HEADER_SIZE..])).await??;

        ChallengePacket::decode(&buf)
    }

    async fn recv_ack(
        &self,
        r: &mut OwnedReadHalf,
        header_buf: &[u8; HEADER_SIZE],
    ) -> Result<AckPacket> {
        let mut buf = vec![0u8; ACK_SIZE];
        buf[..HEADER_SIZE].copy_from_slice(header_buf);
        timeout(self.timeout, r.read_exact(&mut buf[HEADER_SIZE..])).await??;

        AckPacket::decode(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_rejects_invalid_opts_before_dial() {
        // 연결할 서버가 없어도 검증이 먼저 실패해야 함
        let client = TcpClient::new("127.0.0.1", 1, Vec::new(), None);
        let (_tx, rx) = watch::channel(false);

        let opts = RunOpts {
            chunk_size: 9,
            ..Default::default()
        };
        assert!(matches!(
            client.run(opts, rx.clone()).await,
            Err(Error::InvalidChunkSize(9))
        ));

        let opts = RunOpts {
            duration: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(matches!(
            client.run(opts, rx).await,
            Err(Error::InvalidDuration(500))
        ));
    }

    #[test]
    fn test_timeout_defaults_when_unset() {
        let client = TcpClient::new("localhost", 9000, Vec::new(), None);
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);

        let client = TcpClient::new("localhost", 9000, Vec::new(), Some(Duration::from_secs(1)));
        assert_eq!(client.timeout, Duration::from_secs(1));
    }
}
