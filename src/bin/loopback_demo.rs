//! chunkline 루프백 데모
//!
//! 한 프로세스 안에 여러 엔드포인트를 띄우고 인메모리 전송 계층으로
//! 브로드캐스트 / 피어 메시지 / 데이터그램을 주고받음.
//!
//! 사용법:
//!   cargo run --release --bin chunkline-loopback -- [OPTIONS]
//!
//! 예시:
//!   # 4개 피어, 1MB 메시지
//!   cargo run --release --bin chunkline-loopback -- --peers 4 --size 1048576
//!
//!   # 저대역폭 프리셋
//!   cargo run --release --bin chunkline-loopback -- --preset low

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use chunkline::{Config, DeliveryEvent, Endpoint, LoopbackHub, LoopbackTransport, PeerId, Target};

/// 데모에서 쓰는 컴포넌트 ID
const CHAT_COMPONENT: u32 = 1;
const BULK_COMPONENT: u32 = 2;

/// 데모 설정
struct DemoConfig {
    peers: u64,
    message_size: usize,
    messages: usize,
    timeout: Duration,
    config: Config,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            peers: 3,
            message_size: 256 * 1024,
            messages: 4,
            timeout: Duration::from_secs(60),
            config: Config::default(),
        }
    }
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut demo = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--peers" | "-p" => {
                if i + 1 < args.len() {
                    demo.peers = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--size" | "-s" => {
                if i + 1 < args.len() {
                    demo.message_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--messages" | "-m" => {
                if i + 1 < args.len() {
                    demo.messages = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    demo.config.max_chunk_payload = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--rate" => {
                if i + 1 < args.len() {
                    demo.config.broadcast_bytes_per_second =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--preset" => {
                if i + 1 < args.len() {
                    demo.config = match args[i + 1].as_str() {
                        "low" => Config::low_bandwidth(),
                        "lan" => Config::lan(),
                        _ => Config::default(),
                    };
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"chunkline 루프백 데모

인메모리 세션에서 청크 분할 메시지 전송을 시연함
- 피어 0이 모든 피어에 브로드캐스트, 각 피어에 개별 메시지 전송
- 모든 피어가 데이터그램으로 인사

사용법:
  cargo run --release --bin chunkline-loopback -- [OPTIONS]

옵션:
  -p, --peers <N>         피어 수 (기본: 3)
  -s, --size <BYTES>      메시지 크기 (기본: 262144)
  -m, --messages <N>      피어당 메시지 수 (기본: 4)
  --chunk-size <BYTES>    청크 페이로드 크기 (기본: 16384)
  --rate <BYTES/SEC>      브로드캐스트 속도 (기본: 524288)
  --preset <low|lan>      설정 프리셋
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    demo
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let demo = parse_args();
    if demo.peers < 2 {
        return Err("at least 2 peers required".into());
    }

    info!("chunkline loopback demo starting...");
    info!("Peers: {}", demo.peers);
    info!("Message size: {} bytes x {}", demo.message_size, demo.messages);
    info!("Chunk size: {} bytes", demo.config.max_chunk_payload);
    info!(
        "Broadcast rate: {:.1} KB/s",
        demo.config.broadcast_bytes_per_second as f64 / 1024.0
    );

    let hub = LoopbackHub::new();
    let mut endpoints: Vec<Endpoint<LoopbackTransport>> = Vec::new();
    for peer in 0..demo.peers {
        endpoints.push(Endpoint::start(demo.config.clone(), hub.join(peer))?);
    }

    // ─────────────────────────────────────────────────────────────────
    // 수신 콜백: 메시지 수만 셈
    // ─────────────────────────────────────────────────────────────────
    let received = Arc::new(AtomicUsize::new(0));
    let greetings = Arc::new(AtomicUsize::new(0));
    let mut subscriptions = Vec::new();
    for (index, endpoint) in endpoints.iter().enumerate() {
        let counter = received.clone();
        subscriptions.push(endpoint.register_receive_callback(
            BULK_COMPONENT,
            move |peer: PeerId, _, bytes: &[u8]| {
                counter.fetch_add(1, Ordering::Relaxed);
                info!("peer {} <- peer {}: {} bytes", index, peer, bytes.len());
            },
        ));

        let counter = greetings.clone();
        subscriptions.push(endpoint.register_receive_callback(
            CHAT_COMPONENT,
            move |_, _, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            },
        ));
    }

    // ─────────────────────────────────────────────────────────────────
    // 전송
    // ─────────────────────────────────────────────────────────────────
    let start = Instant::now();
    let sender = &endpoints[0];
    let payload = vec![0xABu8; demo.message_size];

    for _ in 0..demo.messages {
        sender.send_broadcast_reliable(BULK_COMPONENT, payload.clone())?;
        for peer in 1..demo.peers {
            sender.send_peer_reliable(peer, BULK_COMPONENT, payload.clone())?;
        }
    }
    for endpoint in &endpoints {
        let hello = format!("hello from {}", endpoint.transport().peer_id());
        endpoint.send_broadcast_unreliable(CHAT_COMPONENT, hello.as_bytes())?;
    }

    let others = (demo.peers - 1) as usize;
    let expected = demo.messages * others * 2;
    info!("Waiting for {} messages...", expected);

    while received.load(Ordering::Relaxed) < expected {
        if start.elapsed() > demo.timeout {
            warn!(
                "Timed out: {}/{} messages received",
                received.load(Ordering::Relaxed),
                expected
            );
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    // ─────────────────────────────────────────────────────────────────
    // 결과
    // ─────────────────────────────────────────────────────────────────
    let elapsed = start.elapsed();
    let mut delivered = 0;
    let mut abandoned = 0;
    for event in sender.events().try_iter() {
        match event {
            DeliveryEvent::Delivered { .. } => delivered += 1,
            DeliveryEvent::Abandoned {
                message_id,
                target,
                chunks_sent,
                chunk_count,
            } => {
                abandoned += 1;
                warn!(
                    "message {} to {:?} abandoned at {}/{}",
                    message_id, target, chunks_sent, chunk_count
                );
            }
        }
    }

    info!("═══════════════════════════════════════════");
    info!("Demo complete!");
    info!("Messages: {}/{} received", received.load(Ordering::Relaxed), expected);
    info!("Greetings: {}", greetings.load(Ordering::Relaxed));
    info!("Delivered: {}, abandoned: {}", delivered, abandoned);
    info!("Pending: {}", sender.pending_send_count(None));
    info!(
        "Pending broadcast: {}",
        sender.pending_send_count(Some(Target::Broadcast))
    );
    info!("Time: {:.2}s", elapsed.as_secs_f64());
    info!(
        "Throughput: {:.2} MB/s",
        (expected * demo.message_size) as f64 / elapsed.as_secs_f64() / 1024.0 / 1024.0
    );
    for endpoint in &endpoints {
        info!("peer {}: {}", endpoint.transport().peer_id(), endpoint.stats().summary());
    }
    info!("═══════════════════════════════════════════");

    drop(subscriptions);
    for endpoint in &endpoints {
        endpoint.stop();
    }
    Ok(())
}
