//! TCP 서버와 서버측 세션 상태 머신
//!
//! accept → hello → (선택) 챌린지/응답 → 입장 제어 → ack → 데이터 페이즈.
//! 컨트롤 플레인 I/O는 호출 단위 타임아웃을 걸고, 데이터 페이즈의 시간
//! 관리는 전송 엔진이 맡는다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::auth;
use crate::config::{ServerConfig, DEFAULT_TIMEOUT};
use crate::packet::{
    packet_type_name, AckCode, AckPacket, AnswerPacket, AuthMethod, ChallengePacket, Direction,
    Header, HelloPacket, PacketType, ANSWER_SIZE, HEADER_SIZE, HELLO_SIZE,
};
use crate::stats::Stats;
use crate::transfer;
use crate::util;
use crate::{Error, Result, PROTOCOL_VERSION};

/// FLO TCP 서버
pub struct TcpServer {
    listener: TcpListener,
    psk: Arc<Vec<u8>>,
    timeout: Duration,
    slots: Arc<Semaphore>,
}

impl TcpServer {
    /// 설정에 따라 리스너 바인딩
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let timeout = if config.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            config.timeout
        };
        let max_tests = config.max_concurrent_tests.max(1);

        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

        Ok(Self {
            listener,
            psk: Arc::new(config.psk),
            timeout,
            slots: Arc::new(Semaphore::new(max_tests as usize)),
        })
    }

    /// 실제 바인딩된 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// accept 루프 실행
    ///
    /// shutdown 신호가 오면 수락을 멈추고 반환한다. 진행 중인 세션은
    /// 자기 shutdown 복제본이나 I/O 타임아웃으로 정리됨.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %self.local_addr()?, "FLO server listening");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("server shutting down");
                    return Ok(());
                }
                res = self.listener.accept() => {
                    let (conn, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("accept 실패: {}", e);
                            continue;
                        }
                    };
                    debug!(remote_addr = %peer, "accepted new connection");

                    let session = Session {
                        psk: self.psk.clone(),
                        timeout: self.timeout,
                        slots: self.slots.clone(),
                    };
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.handle(conn, shutdown).await {
                            warn!(error = %e, "session ended with error");
                        }
                    });
                }
            }
        }
    }
}

/// 커넥션 하나의 세션 상태
struct Session {
    psk: Arc<Vec<u8>>,
    timeout: Duration,
    slots: Arc<Semaphore>,
}

impl Session {
    async fn handle(&self, conn: TcpStream, shutdown: watch::Receiver<bool>) -> Result<()> {
        let (mut r, mut w) = conn.into_split();

        let (header, header_buf) = self.recv_header(&mut r).await?;
        debug!(
            version = header.version,
            packet_type = packet_type_name(header.packet_type),
            "parsed header",
        );

        if header.version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion {
                got: header.version,
            });
        }
        if header.packet_type != PacketType::Hello as u8 {
            return Err(Error::IncorrectType {
                expected: PacketType::Hello as u8,
                got: header.packet_type,
            });
        }

        let (hello, hello_buf) = self.recv_hello(&mut r, &header_buf).await?;
        debug!(
            session_id = %hello.session_id,
            direction = ?hello.direction,
            chunk_size = hello.chunk_size,
            "hello received",
        );

        let auth_enabled = !self.psk.is_empty();
        let auth = if auth_enabled {
            AuthMethod::Hmac
        } else {
            AuthMethod::None
        };

        if auth_enabled {
            let verified = self
                .authenticate(&mut r, &mut w, hello.session_id, &hello_buf)
                .await?;
            if !verified {
                self.send_ack(&mut w, hello.session_id, auth, AckCode::AuthFailed)
                    .await?;
                return Err(Error::AuthFailed);
            }
        }

        // 입장 제어: 논블로킹 슬롯 획득, 실패 시 즉시 Busy
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.send_ack(&mut w, hello.session_id, auth, AckCode::Busy)
                    .await?;
                return Err(Error::Busy);
            }
        };

        self.send_ack(&mut w, hello.session_id, auth, AckCode::Ok)
            .await?;

        let duration = Duration::from_millis(hello.duration_ms);
        let warmup = Duration::from_millis(hello.warmup_ms);
        let stats = Arc::new(Stats::new());
        let started = tokio::time::Instant::now();

        // 서버측 방향 매핑: 업로드는 수신만, 다운로드는 송신만
        let (read, write) = match hello.direction {
            Direction::Bidi => (Some(r), Some(w)),
            Direction::Upload => (Some(r), None),
            Direction::Download => (None, Some(w)),
        };

        transfer::transfer(
            read,
            write,
            hello.chunk_size,
            duration,
            warmup,
            stats.clone(),
            shutdown,
        )
        .await;
        drop(permit);

        let effective = started.elapsed().saturating_sub(warmup);
        info!(
            session_id = %hello.session_id,
            duration = %util::display_duration(effective),
            total_sent = %util::display_bytes(stats.sent()),
            avg_sent = %util::display_bits_per_sec(stats.sent(), effective),
            total_rcvd = %util::display_bytes(stats.rcvd()),
            avg_rcvd = %util::display_bits_per_sec(stats.rcvd(), effective),
            "client data transfer complete",
        );

        Ok(())
    }

    async fn recv_header(&self, r: &mut OwnedReadHalf) -> Result<(Header, [u8; HEADER_SIZE])> {
        let mut buf = [0u8; HEADER_SIZE];
        timeout(self.timeout, r.read_exact(&mut buf)).await??;

        let header = Header::decode(&buf)?;
        Ok((header, buf))
    }

    async fn recv_hello(
        &self,
        r: &mut OwnedReadHalf,
        header_buf: &[u8; HEADER_SIZE],
    ) -> Result<(HelloPacket, Vec<u8>)> {
        // 인증 해시가 수신 바이트 그대로를 입력으로 쓰므로 원본 버퍼를 보존
        let mut buf = vec![0u8; HELLO_SIZE];
        buf[..HEADER_SIZE].copy_from_slice(header_buf);
        timeout(self.timeout, r.read_exact(&mut buf[HEADER_SIZE..])).await??;

        let hello = HelloPacket::decode(&buf)?;
        Ok((hello, buf))
    }

    async fn send_ack(
        &self,
        w: &mut OwnedWriteHalf,
        session_id: Ulid,
        auth: AuthMethod,
        code: AckCode,
    ) -> Result<()> {
        let ack = AckPacket::new(session_id, auth, code);
        timeout(self.timeout, w.write_all(&ack.encode())).await??;
        Ok(())
    }

    /// 챌린지/응답 핸드쉐이크 수행. 해시 일치 여부를 반환
    async fn authenticate(
        &self,
        r: &mut OwnedReadHalf,
        w: &mut OwnedWriteHalf,
        session_id: Ulid,
        hello_buf: &[u8],
    ) -> Result<bool> {
        // 매 챌린지마다 새 nonce (세션 간 nonce 캐시는 두지 않음)
        let nonce = util::new_nonce();
        let challenge = ChallengePacket::new(session_id, AuthMethod::Hmac, nonce);
        timeout(self.timeout, w.write_all(&challenge.encode())).await??;
        debug!(session_id = %session_id, "challenge sent");

        let (header, header_buf) = self.recv_header(r).await?;
        if header.version != PROTOCOL_VERSION {
            return Err(Error::UnsupportedVersion {
                got: header.version,
            });
        }
        if header.packet_type != PacketType::Answer as u8 {
            return Err(Error::IncorrectType {
                expected: PacketType::Answer as u8,
                got: header.packet_type,
            });
        }

        let mut buf = vec![0u8; ANSWER_SIZE];
        buf[..HEADER_SIZE].copy_from_slice(&header_buf);
        timeout(self.timeout, r.read_exact(&mut buf[HEADER_SIZE..])).await??;
        let answer = AnswerPacket::decode(&buf)?;

        let verified = auth::verify_auth_hash(hello_buf, &nonce, &self.psk, &answer.auth_hash);
        if verified {
            info!(session_id = %session_id, "client authenticated");
        } else {
            warn!(session_id = %session_id, "authentication failed: invalid auth hash");
        }

        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TcpClient;
    use crate::config::RunOpts;
    use crate::packet::{Security, Transport, ACK_SIZE, CHALLENGE_SIZE};

    async fn start_server(psk: &[u8], max_tests: u32) -> (SocketAddr, watch::Sender<bool>) {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            psk: psk.to_vec(),
            timeout: Duration::from_secs(3),
            max_concurrent_tests: max_tests,
        };
        let server = TcpServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            let _ = server.run(shutdown_rx).await;
        });

        (addr, shutdown_tx)
    }

    fn test_opts(direction: Direction) -> RunOpts {
        RunOpts {
            direction,
            duration: Duration::from_secs(2),
            warmup: Duration::ZERO,
            chunk_size: 1024,
        }
    }

    #[tokio::test]
    async fn test_upload_no_auth() {
        let (addr, _shutdown) = start_server(b"", 1).await;

        let client = TcpClient::new("127.0.0.1", addr.port(), Vec::new(), None);
        let (_tx, rx) = watch::channel(false);
        let summary = client.run(test_opts(Direction::Upload), rx).await.unwrap();

        assert!(summary.bytes_sent > 0);
        assert_eq!(summary.bytes_rcvd, 0);
    }

    #[tokio::test]
    async fn test_download_hmac_with_warmup() {
        let (addr, _shutdown) = start_server(b"secret", 1).await;

        let client = TcpClient::new("127.0.0.1", addr.port(), b"secret".to_vec(), None);
        let (_tx, rx) = watch::channel(false);
        let opts = RunOpts {
            direction: Direction::Download,
            duration: Duration::from_secs(2),
            warmup: Duration::from_millis(500),
            chunk_size: 4096,
        };
        let summary = client.run(opts, rx).await.unwrap();

        // 서버가 내려보낸 바이트를 수신했고, 송신 펌프는 돌지 않음
        assert!(summary.bytes_rcvd > 0);
        assert_eq!(summary.bytes_sent, 0);
    }

    #[tokio::test]
    async fn test_bidi_both_directions_flow() {
        let (addr, _shutdown) = start_server(b"", 1).await;

        let client = TcpClient::new("127.0.0.1", addr.port(), Vec::new(), None);
        let (_tx, rx) = watch::channel(false);
        let summary = client.run(test_opts(Direction::Bidi), rx).await.unwrap();

        assert!(summary.bytes_sent > 0);
        assert!(summary.bytes_rcvd > 0);
    }

    #[tokio::test]
    async fn test_auth_failed_wrong_psk() {
        let (addr, _shutdown) = start_server(b"secret", 1).await;

        let client = TcpClient::new("127.0.0.1", addr.port(), b"wrong".to_vec(), None);
        let (_tx, rx) = watch::channel(false);
        let err = client
            .run(test_opts(Direction::Upload), rx)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AuthFailed));
    }

    #[tokio::test]
    async fn test_auth_failed_zeroed_hash() {
        let (addr, _shutdown) = start_server(b"secret", 1).await;

        // 제로 해시를 보내는 수동 클라이언트
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let hello = HelloPacket::new(
            util::new_session_id(),
            Transport::Tcp,
            Security::None,
            Direction::Upload,
            1024,
            Duration::from_secs(2),
            Duration::ZERO,
        );
        conn.write_all(&hello.encode()).await.unwrap();

        let mut buf = vec![0u8; CHALLENGE_SIZE];
        conn.read_exact(&mut buf).await.unwrap();
        let challenge = ChallengePacket::decode(&buf).unwrap();
        assert_eq!(challenge.session_id, hello.session_id);
        assert_eq!(challenge.auth_method, AuthMethod::Hmac);

        let answer = AnswerPacket::new(hello.session_id, [0u8; 32]);
        conn.write_all(&answer.encode()).await.unwrap();

        let mut buf = vec![0u8; ACK_SIZE];
        conn.read_exact(&mut buf).await.unwrap();
        let ack = AckPacket::decode(&buf).unwrap();
        assert_eq!(ack.code, AckCode::AuthFailed);
        assert_eq!(ack.session_id, hello.session_id);
    }

    #[tokio::test]
    async fn test_busy_then_slot_released() {
        let (addr, _shutdown) = start_server(b"", 1).await;
        let (_tx, rx) = watch::channel(false);

        // 첫 세션이 유일한 슬롯을 차지
        let first_client = TcpClient::new("127.0.0.1", addr.port(), Vec::new(), None);
        let first_rx = rx.clone();
        let first = tokio::spawn(async move {
            first_client
                .run(test_opts(Direction::Upload), first_rx)
                .await
        });

        // 데이터 페이즈에 들어갈 시간을 준 뒤 두 번째 접속
        tokio::time::sleep(Duration::from_millis(500)).await;
        let second = TcpClient::new("127.0.0.1", addr.port(), Vec::new(), None);
        let err = second
            .run(test_opts(Direction::Upload), rx.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy));

        // 첫 세션이 끝나면 슬롯이 반환되어 다음 세션이 들어감
        assert!(first.await.unwrap().is_ok());
        tokio::time::sleep(Duration::from_millis(500)).await;
        let third = TcpClient::new("127.0.0.1", addr.port(), Vec::new(), None);
        assert!(third.run(test_opts(Direction::Upload), rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_version_closes_without_ack() {
        let (addr, _shutdown) = start_server(b"", 1).await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        let mut buf = HelloPacket::new(
            util::new_session_id(),
            Transport::Tcp,
            Security::None,
            Direction::Upload,
            1024,
            Duration::from_secs(2),
            Duration::ZERO,
        )
        .encode()
        .to_vec();
        buf[4] = 2; // 알 수 없는 버전
        conn.write_all(&buf).await.unwrap();

        // 서버는 ACK 없이 연결을 닫음
        let mut ack = [0u8; ACK_SIZE];
        assert!(conn.read_exact(&mut ack).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_early_close_during_download() {
        // 1초만 내려보내고 끊는 최소 구현 서버
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();

            let mut buf = vec![0u8; HELLO_SIZE];
            conn.read_exact(&mut buf).await.unwrap();
            let hello = HelloPacket::decode(&buf).unwrap();

            let ack = AckPacket::new(hello.session_id, AuthMethod::None, AckCode::Ok);
            conn.write_all(&ack.encode()).await.unwrap();

            let payload = vec![0u8; 4096];
            let start = std::time::Instant::now();
            while start.elapsed() < Duration::from_secs(1) {
                if conn.write_all(&payload).await.is_err() {
                    break;
                }
            }
            drop(conn);
        });

        let client = TcpClient::new("127.0.0.1", addr.port(), Vec::new(), None);
        let (_tx, rx) = watch::channel(false);
        let opts = RunOpts {
            direction: Direction::Download,
            duration: Duration::from_secs(5),
            warmup: Duration::ZERO,
            chunk_size: 4096,
        };

        let start = std::time::Instant::now();
        let summary = client.run(opts, rx).await.unwrap();

        // EOF를 본 클라이언트는 에러 없이, 자기 데드라인(5초)을 기다리지 않고 돌아옴
        assert!(summary.bytes_rcvd > 0);
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
