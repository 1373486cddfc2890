//! 양방향 전송 엔진
//!
//! 송신 펌프와 수신 펌프가 같은 커넥션의 읽기/쓰기 절반을 독립적으로
//! 구동하고, 리포터가 워밍업 게이트와 1초 구간 통계를 관리함.
//! 펌프끼리는 원자 카운터와 정지 신호 외에는 아무것도 공유하지 않음.
//!
//! 데이터 페이즈의 에러는 밖으로 전파하지 않고 "조기 종료" 분류에만 쓴다.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::stats::{Stats, StatsDiff};
use crate::util;

/// 데이터 페이즈 종료 후 상대 펌프가 드레인할 유예 시간
const GRACE: Duration = Duration::from_millis(250);

/// 송신 펌프
///
/// 결정적 패턴(buf[i] = i mod 256)으로 버퍼를 한 번만 채우고,
/// 같은 버퍼를 재사용해서 반복 기록한다. 반복마다 재할당하지 않음.
/// 종료 시 하프클로즈를 위해 write 절반을 돌려준다.
async fn send_loop(
    mut w: OwnedWriteHalf,
    chunk_size: u32,
    stats: Arc<Stats>,
    counting: Arc<AtomicBool>,
    err_tx: mpsc::Sender<io::Result<()>>,
    mut stop: watch::Receiver<bool>,
) -> OwnedWriteHalf {
    let mut buf = vec![0u8; chunk_size as usize];
    for (i, b) in buf.iter_mut().enumerate() {
        *b = i as u8;
    }

    loop {
        tokio::select! {
            _ = stop.changed() => {
                let _ = err_tx.send(Ok(())).await;
                return w;
            }
            res = w.write(&buf) => match res {
                Ok(n) => {
                    if counting.load(Ordering::Relaxed) {
                        stats.add_sent(n as u64);
                    }
                }
                Err(e) => {
                    let _ = err_tx.send(Err(e)).await;
                    return w;
                }
            }
        }
    }
}

/// 수신 펌프
///
/// EOF는 에러로 전파해서 엔진이 데드라인 대비 조기 종료 여부를
/// 분류할 수 있게 한다.
async fn recv_loop(
    mut r: OwnedReadHalf,
    chunk_size: u32,
    stats: Arc<Stats>,
    counting: Arc<AtomicBool>,
    err_tx: mpsc::Sender<io::Result<()>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; chunk_size as usize];

    loop {
        tokio::select! {
            _ = stop.changed() => {
                let _ = err_tx.send(Ok(())).await;
                return;
            }
            res = r.read(&mut buf) => match res {
                Ok(0) => {
                    let _ = err_tx.send(Err(io::ErrorKind::UnexpectedEof.into())).await;
                    return;
                }
                Ok(n) => {
                    if counting.load(Ordering::Relaxed) {
                        stats.add_rcvd(n as u64);
                    }
                }
                Err(e) => {
                    let _ = err_tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }
}

/// 리포터
///
/// 워밍업 동안 잠들었다가 게이트를 열고, 이후 1초 간격으로
/// 구간 통계를 방출한다. 게이트의 유일한 writer.
async fn reporter(
    stats: Arc<Stats>,
    counting: Arc<AtomicBool>,
    warmup: Duration,
    diff_tx: mpsc::Sender<StatsDiff>,
    mut stop: watch::Receiver<bool>,
) {
    if !warmup.is_zero() {
        info!("warming up for {}", util::display_duration(warmup));
        tokio::select! {
            _ = tokio::time::sleep(warmup) => {}
            _ = stop.changed() => return,
        }
    }
    counting.store(true, Ordering::Relaxed);

    let mut tick = tokio::time::interval_at(
        Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    let mut t = Instant::now();
    let mut last_sent = stats.sent();
    let mut last_rcvd = stats.rcvd();

    loop {
        tokio::select! {
            _ = stop.changed() => return,
            _ = tick.tick() => {
                let sent = stats.sent();
                let rcvd = stats.rcvd();
                let now = Instant::now();

                let diff = StatsDiff {
                    bytes_sent: sent - last_sent,
                    bytes_rcvd: rcvd - last_rcvd,
                    duration: now - t,
                };

                t = now;
                last_sent = sent;
                last_rcvd = rcvd;

                if diff_tx.send(diff).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// 구간 통계를 로그로 내보냄
async fn log_diffs(mut diff_rx: mpsc::Receiver<StatsDiff>) {
    while let Some(diff) = diff_rx.recv().await {
        match (diff.bytes_sent > 0, diff.bytes_rcvd > 0) {
            (true, true) => info!(
                sent = %util::display_bits_per_sec(diff.bytes_sent, diff.duration),
                rcvd = %util::display_bits_per_sec(diff.bytes_rcvd, diff.duration),
                "throughput",
            ),
            (true, false) => info!(
                sent = %util::display_bits_per_sec(diff.bytes_sent, diff.duration),
                "throughput",
            ),
            (false, true) => info!(
                rcvd = %util::display_bits_per_sec(diff.bytes_rcvd, diff.duration),
                "throughput",
            ),
            (false, false) => info!("throughput"),
        }
    }
}

/// 데이터 페이즈 실행
///
/// read/write 절반은 방향에 따라 어느 쪽이든 None일 수 있다.
/// 데드라인(warmup + duration), 첫 펌프 에러, 상위 취소 중 먼저 오는
/// 것으로 종료하고, write 절반이 있으면 하프클로즈(FIN)로 상대 수신
/// 펌프가 바로 EOF를 보게 한다.
pub async fn transfer(
    read: Option<OwnedReadHalf>,
    write: Option<OwnedWriteHalf>,
    chunk_size: u32,
    duration: Duration,
    warmup: Duration,
    stats: Arc<Stats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let total_time = warmup + duration;
    let deadline = Instant::now() + total_time;

    let counting = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = watch::channel(false);
    let (err_tx, mut err_rx) = mpsc::channel::<io::Result<()>>(2);
    let (diff_tx, diff_rx) = mpsc::channel::<StatsDiff>(16);

    tokio::spawn(log_diffs(diff_rx));
    tokio::spawn(reporter(
        stats.clone(),
        counting.clone(),
        warmup,
        diff_tx,
        stop_rx.clone(),
    ));

    let send_task = write.map(|w| {
        tokio::spawn(send_loop(
            w,
            chunk_size,
            stats.clone(),
            counting.clone(),
            err_tx.clone(),
            stop_rx.clone(),
        ))
    });
    let recv_task = read.map(|r| {
        tokio::spawn(recv_loop(
            r,
            chunk_size,
            stats.clone(),
            counting.clone(),
            err_tx.clone(),
            stop_rx.clone(),
        ))
    });
    drop(err_tx);
    drop(stop_rx);

    // 데드라인, 첫 펌프 에러, 상위 취소 중 먼저 오는 것까지 대기
    let mut err_stop: Option<io::Error> = None;
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => {}
        res = err_rx.recv() => {
            if let Some(Err(e)) = res {
                err_stop = Some(e);
            }
        }
        _ = shutdown.changed() => {}
    }
    let _ = stop_tx.send(true);

    // write 절반이 있으면 하프클로즈로 상대에게 EOF 전달
    if let Some(task) = send_task {
        if let Ok(mut w) = task.await {
            let _ = w.shutdown().await;
        }
    }

    // 남은 펌프가 정리될 시간을 준 뒤 터미널 결과는 버림
    if let Some(task) = recv_task {
        let _ = tokio::time::timeout(GRACE, task).await;
    }
    while err_rx.try_recv().is_ok() {}

    // 조기 종료 분류: 데드라인까지 유의미한 시간이 남은 상태의 에러만 경고
    let remaining = deadline.saturating_duration_since(Instant::now());
    if let Some(err) = err_stop {
        if remaining > GRACE {
            warn!(error = %err, "transfer ended early (disconnected)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reporter_warmup_gate_and_cadence() {
        let stats = Arc::new(Stats::new());
        let counting = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (diff_tx, mut diff_rx) = mpsc::channel(16);

        tokio::spawn(reporter(
            stats.clone(),
            counting.clone(),
            Duration::from_millis(400),
            diff_tx,
            stop_rx,
        ));

        // 워밍업 동안에는 이벤트가 없고 게이트도 닫혀 있음
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!counting.load(Ordering::Relaxed));
        assert!(diff_rx.try_recv().is_err());

        // 워밍업이 끝나면 게이트가 열림
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(counting.load(Ordering::Relaxed));

        stats.add_sent(1000);
        stats.add_rcvd(500);

        // 이후 약 1초 간격으로 구간 통계가 나옴
        let first = tokio::time::timeout(Duration::from_millis(1500), diff_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.bytes_sent, 1000);
        assert_eq!(first.bytes_rcvd, 500);

        let second = tokio::time::timeout(Duration::from_millis(1500), diff_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.bytes_sent, 0);
        assert_eq!(second.bytes_rcvd, 0);

        let _ = stop_tx.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_signal_during_warmup() {
        let stats = Arc::new(Stats::new());
        let counting = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (diff_tx, mut diff_rx) = mpsc::channel(16);

        let handle = tokio::spawn(reporter(
            stats,
            counting.clone(),
            Duration::from_secs(10),
            diff_tx,
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = stop_tx.send(true);
        handle.await.unwrap();

        // 워밍업 중 정지하면 게이트는 열리지 않음
        assert!(!counting.load(Ordering::Relaxed));
        assert!(diff_rx.try_recv().is_err());
    }
}
