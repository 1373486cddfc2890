//! 와이어 패킷 정의
//!
//! 모든 패킷은 고정 길이이며 길이 프리픽스 없이 헤더의 타입 바이트만으로
//! 전체 크기가 결정됨. 멀티바이트 정수는 리틀 엔디언.
//!
//! 수신측은 항상 6바이트 헤더를 먼저 읽고, 타입에 따라 나머지
//! `크기 - 6` 바이트를 정확히 읽는다. 재동기화 프로토콜은 없음.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ulid::Ulid;

use crate::util;
use crate::{Error, Result, MAGIC, PROTOCOL_VERSION};

/// 공통 헤더 크기 (매직 4 + 버전 1 + 타입 1)
pub const HEADER_SIZE: usize = 6;

/// HELLO 패킷 크기
pub const HELLO_SIZE: usize = HEADER_SIZE + 16 + 1 + 1 + 1 + 2 + 4 + 8 + 8 + 16;

/// CHALLENGE 패킷 크기
pub const CHALLENGE_SIZE: usize = HEADER_SIZE + 16 + 1 + 16;

/// ANSWER 패킷 크기
pub const ANSWER_SIZE: usize = HEADER_SIZE + 16 + 32;

/// ACK 패킷 크기
pub const ACK_SIZE: usize = HEADER_SIZE + 16 + 1 + 1;

/// RESULT 패킷 크기
pub const RESULT_SIZE: usize = HEADER_SIZE + 16 + 8 + 8;

/// 청크 크기 하한 (바이트)
pub const MIN_CHUNK_SIZE: u32 = 10;

/// 청크 크기 상한 (바이트)
pub const MAX_CHUNK_SIZE: u32 = 10_000_000;

/// 측정 시간 하한 (밀리초)
pub const MIN_DURATION_MS: u64 = 1000;

/// 패킷 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// 세션 시작 요청 (클라이언트 → 서버)
    Hello = 1,

    /// 인증 챌린지 (서버 → 클라이언트, 인증 활성 시)
    Challenge = 2,

    /// 챌린지 응답 (클라이언트 → 서버)
    Answer = 3,

    /// 승인/거부 응답 (서버 → 클라이언트)
    Ack = 4,

    /// 측정 결과 (인코딩만 정의, 현재 전송되지 않음)
    Result = 5,
}

/// 로그용 패킷 타입 이름
pub fn packet_type_name(t: u8) -> &'static str {
    match t {
        1 => "HELLO",
        2 => "CHALLENGE",
        3 => "ANSWER",
        4 => "ACK",
        5 => "RESULT",
        _ => "UNKNOWN",
    }
}

/// 전송 계층
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Transport {
    /// TCP (유일하게 구현됨)
    Tcp = 1,

    /// UDP (예약)
    Udp = 2,

    /// SCTP (예약)
    Sctp = 3,
}

impl Transport {
    fn from_wire(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Transport::Tcp),
            2 => Ok(Transport::Udp),
            3 => Ok(Transport::Sctp),
            other => Err(Error::UnsupportedTransport(other)),
        }
    }
}

/// 보안 계층
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Security {
    /// 평문
    None = 0,

    /// TLS (예약)
    Tls = 1,
}

impl Security {
    fn from_wire(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Security::None),
            1 => Ok(Security::Tls),
            other => Err(Error::UnsupportedSecurity(other)),
        }
    }
}

/// 데이터 흐름 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// 양방향 송수신
    Bidi = 0,

    /// 클라이언트 송신, 서버 수신
    Upload = 1,

    /// 클라이언트 수신, 서버 송신
    Download = 2,
}

impl Direction {
    fn from_wire(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Direction::Bidi),
            1 => Ok(Direction::Upload),
            2 => Ok(Direction::Download),
            other => Err(Error::UnsupportedDirection(other)),
        }
    }
}

/// 인증 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    /// 인증 없음
    None = 0,

    /// HMAC-SHA256
    Hmac = 1,
}

impl AuthMethod {
    fn from_wire(b: u8) -> Result<Self> {
        match b {
            0 => Ok(AuthMethod::None),
            1 => Ok(AuthMethod::Hmac),
            other => Err(Error::UnsupportedAuthMethod(other)),
        }
    }
}

/// ACK 응답 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckCode {
    /// 승인, 측정 진행
    Ok = 0,

    /// 지원하지 않는 프로토콜 버전
    InvalidVersion = 1,

    /// 잘못된 HELLO 패킷
    InvalidHello = 2,

    /// 인증 실패
    AuthFailed = 3,

    /// 동시 측정 한도 초과
    Busy = 4,
}

impl AckCode {
    fn from_wire(b: u8) -> Result<Self> {
        match b {
            0 => Ok(AckCode::Ok),
            1 => Ok(AckCode::InvalidVersion),
            2 => Ok(AckCode::InvalidHello),
            3 => Ok(AckCode::AuthFailed),
            4 => Ok(AckCode::Busy),
            other => Err(Error::UnexpectedAckCode(other)),
        }
    }
}

/// 공통 패킷 헤더
///
/// 헤더 디코더는 매직만 검증함. 버전과 타입의 판단은 상태 머신이
/// 전체 패킷을 읽기 전에 수행한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// 프로토콜 버전
    pub version: u8,

    /// 패킷 타입 바이트
    pub packet_type: u8,
}

impl Header {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type: packet_type as u8,
        }
    }

    /// 6바이트 헤더 파싱
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidPacketSize {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }

        if data[0..4] != MAGIC {
            return Err(Error::InvalidMagic);
        }

        Ok(Self {
            version: data[4],
            packet_type: data[5],
        })
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(&MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.packet_type);
    }

    /// 전체 패킷 디코드 앞단의 공통 검사: 길이, 매직, 기대 타입
    fn decode_expecting(data: &[u8], size: usize, expected: PacketType) -> Result<Self> {
        if data.len() != size {
            return Err(Error::InvalidPacketSize {
                expected: size,
                got: data.len(),
            });
        }

        let header = Header::decode(&data[..HEADER_SIZE])?;
        if header.packet_type != expected as u8 {
            return Err(Error::IncorrectType {
                expected: expected as u8,
                got: header.packet_type,
            });
        }

        Ok(header)
    }
}

/// HELLO 패킷 (클라이언트 → 서버, 세션 시작)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloPacket {
    pub header: Header,

    /// 세션 식별자 (클라이언트가 생성, 서버가 모든 응답에 에코)
    pub session_id: Ulid,

    /// 전송 계층
    pub transport: Transport,

    /// 보안 계층
    pub security: Security,

    /// 데이터 흐름 방향
    pub direction: Direction,

    /// 예약 플래그 (반드시 0)
    pub flags: u16,

    /// 청크 크기 (바이트)
    pub chunk_size: u32,

    /// 측정 시간 (밀리초)
    pub duration_ms: u64,

    /// 워밍업 시간 (밀리초)
    pub warmup_ms: u64,

    /// 클라이언트 nonce (전부 0 금지, 향후 양방향 인증용 예약)
    pub client_nonce: [u8; 16],
}

impl HelloPacket {
    pub fn new(
        session_id: Ulid,
        transport: Transport,
        security: Security,
        direction: Direction,
        chunk_size: u32,
        duration: Duration,
        warmup: Duration,
    ) -> Self {
        Self {
            header: Header::new(PacketType::Hello),
            session_id,
            transport,
            security,
            direction,
            flags: 0,
            chunk_size,
            duration_ms: duration.as_millis() as u64,
            warmup_ms: warmup.as_millis() as u64,
            client_nonce: util::new_nonce(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HELLO_SIZE);
        self.header.put(&mut buf);
        buf.put_slice(&self.session_id.to_bytes());
        buf.put_u8(self.transport as u8);
        buf.put_u8(self.security as u8);
        buf.put_u8(self.direction as u8);
        buf.put_u16_le(self.flags);
        buf.put_u32_le(self.chunk_size);
        buf.put_u64_le(self.duration_ms);
        buf.put_u64_le(self.warmup_ms);
        buf.put_slice(&self.client_nonce);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = Header::decode_expecting(data, HELLO_SIZE, PacketType::Hello)?;

        let mut buf = &data[HEADER_SIZE..];
        let mut session = [0u8; 16];
        buf.copy_to_slice(&mut session);

        let transport = Transport::from_wire(buf.get_u8())?;
        let security = Security::from_wire(buf.get_u8())?;
        let direction = Direction::from_wire(buf.get_u8())?;

        let flags = buf.get_u16_le();
        if flags != 0 {
            return Err(Error::InvalidFlags(flags));
        }

        let chunk_size = buf.get_u32_le();
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(Error::InvalidChunkSize(chunk_size));
        }

        let duration_ms = buf.get_u64_le();
        if duration_ms < MIN_DURATION_MS {
            return Err(Error::InvalidDuration(duration_ms));
        }

        let warmup_ms = buf.get_u64_le();

        let mut client_nonce = [0u8; 16];
        buf.copy_to_slice(&mut client_nonce);
        if client_nonce.iter().all(|&b| b == 0) {
            return Err(Error::InvalidNonce);
        }

        Ok(Self {
            header,
            session_id: Ulid::from_bytes(session),
            transport,
            security,
            direction,
            flags,
            chunk_size,
            duration_ms,
            warmup_ms,
            client_nonce,
        })
    }
}

/// CHALLENGE 패킷 (서버 → 클라이언트, 인증 활성 시)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePacket {
    pub header: Header,
    pub session_id: Ulid,

    /// 인증 방식
    pub auth_method: AuthMethod,

    /// 서버 nonce (인증 해시 입력)
    pub server_nonce: [u8; 16],
}

impl ChallengePacket {
    pub fn new(session_id: Ulid, auth_method: AuthMethod, server_nonce: [u8; 16]) -> Self {
        Self {
            header: Header::new(PacketType::Challenge),
            session_id,
            auth_method,
            server_nonce,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(CHALLENGE_SIZE);
        self.header.put(&mut buf);
        buf.put_slice(&self.session_id.to_bytes());
        buf.put_u8(self.auth_method as u8);
        buf.put_slice(&self.server_nonce);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = Header::decode_expecting(data, CHALLENGE_SIZE, PacketType::Challenge)?;

        let mut buf = &data[HEADER_SIZE..];
        let mut session = [0u8; 16];
        buf.copy_to_slice(&mut session);

        let auth_method = AuthMethod::from_wire(buf.get_u8())?;

        let mut server_nonce = [0u8; 16];
        buf.copy_to_slice(&mut server_nonce);

        Ok(Self {
            header,
            session_id: Ulid::from_bytes(session),
            auth_method,
            server_nonce,
        })
    }
}

/// ANSWER 패킷 (클라이언트 → 서버, 챌린지 응답)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerPacket {
    pub header: Header,
    pub session_id: Ulid,

    /// HMAC-SHA256 인증 해시
    pub auth_hash: [u8; 32],
}

impl AnswerPacket {
    pub fn new(session_id: Ulid, auth_hash: [u8; 32]) -> Self {
        Self {
            header: Header::new(PacketType::Answer),
            session_id,
            auth_hash,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ANSWER_SIZE);
        self.header.put(&mut buf);
        buf.put_slice(&self.session_id.to_bytes());
        buf.put_slice(&self.auth_hash);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = Header::decode_expecting(data, ANSWER_SIZE, PacketType::Answer)?;

        let mut buf = &data[HEADER_SIZE..];
        let mut session = [0u8; 16];
        buf.copy_to_slice(&mut session);

        let mut auth_hash = [0u8; 32];
        buf.copy_to_slice(&mut auth_hash);

        Ok(Self {
            header,
            session_id: Ulid::from_bytes(session),
            auth_hash,
        })
    }
}

/// ACK 패킷 (서버 → 클라이언트, 승인/거부)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    pub header: Header,
    pub session_id: Ulid,

    /// 사용된 인증 방식
    pub auth: AuthMethod,

    /// 응답 코드
    pub code: AckCode,
}

impl AckPacket {
    pub fn new(session_id: Ulid, auth: AuthMethod, code: AckCode) -> Self {
        Self {
            header: Header::new(PacketType::Ack),
            session_id,
            auth,
            code,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ACK_SIZE);
        self.header.put(&mut buf);
        buf.put_slice(&self.session_id.to_bytes());
        buf.put_u8(self.auth as u8);
        buf.put_u8(self.code as u8);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = Header::decode_expecting(data, ACK_SIZE, PacketType::Ack)?;

        let mut buf = &data[HEADER_SIZE..];
        let mut session = [0u8; 16];
        buf.copy_to_slice(&mut session);

        let auth = AuthMethod::from_wire(buf.get_u8())?;
        let code = AckCode::from_wire(buf.get_u8())?;

        Ok(Self {
            header,
            session_id: Ulid::from_bytes(session),
            auth,
            code,
        })
    }
}

/// RESULT 패킷 (세션 최종 송수신 바이트, 현재 전송되지 않음)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultPacket {
    pub header: Header,
    pub session_id: Ulid,

    /// 측정 중 송신한 총 바이트
    pub bytes_sent: u64,

    /// 측정 중 수신한 총 바이트
    pub bytes_rcvd: u64,
}

impl ResultPacket {
    pub fn new(session_id: Ulid, bytes_sent: u64, bytes_rcvd: u64) -> Self {
        Self {
            header: Header::new(PacketType::Result),
            session_id,
            bytes_sent,
            bytes_rcvd,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESULT_SIZE);
        self.header.put(&mut buf);
        buf.put_slice(&self.session_id.to_bytes());
        buf.put_u64_le(self.bytes_sent);
        buf.put_u64_le(self.bytes_rcvd);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = Header::decode_expecting(data, RESULT_SIZE, PacketType::Result)?;

        let mut buf = &data[HEADER_SIZE..];
        let mut session = [0u8; 16];
        buf.copy_to_slice(&mut session);

        let bytes_sent = buf.get_u64_le();
        let bytes_rcvd = buf.get_u64_le();

        Ok(Self {
            header,
            session_id: Ulid::from_bytes(session),
            bytes_sent,
            bytes_rcvd,
        })
    }
}
