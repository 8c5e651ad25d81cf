//! End-to-end launches through the library API.
//!
//! These tests drive `launch` the way the binary does: parse a command line,
//! build a plan and run it on a tokio runtime until the shutdown trigger fires.

use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use vecu::backend::{build_backend, BackendConfig, SyntheticConfig};
use vecu::cli;
use vecu::config::LauncherConfig;
use vecu::error::EvaluationError;
use vecu::overrides::ServiceToggle;
use vecu::transport::{PlatformCapability, TransportScheme};
use vecu::uds::ServiceId;
use vecu::{launch, shutdown_channel, LaunchError};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("probe port");
    listener.local_addr().expect("probe addr").port()
}

fn dataset() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("dataset file");
    write!(
        file,
        r#"{{ "records": [
            {{ "request": "3e00", "response": "7e00" }},
            {{ "request": "22f190", "response": "62f19056454355" }}
        ] }}"#
    )
    .expect("write dataset");
    file
}

async fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server on port {port} never came up");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_target_with_dataset_serves_and_shuts_down_cleanly() {
    let file = dataset();
    let port = free_port();
    let target = format!("stream://127.0.0.1:{port}");
    let invocation = cli::parse_from([
        "vecu",
        target.as_str(),
        "storage-backed",
        file.path().to_str().unwrap(),
    ])
    .unwrap();
    let plan = invocation.into_plan(PlatformCapability::Limited).unwrap();
    assert_eq!(plan.target.scheme(), TransportScheme::Tcp);

    let (trigger, shutdown) = shutdown_channel();
    let server = tokio::spawn(async move {
        launch(plan, &LauncherConfig::default(), shutdown).await
    });

    let stream = connect(port).await;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    writer.write_all(b"22f190\n").await.unwrap();
    assert_eq!(
        lines.next_line().await.unwrap().as_deref(),
        Some("62f19056454355")
    );

    // Not in the dataset: the default-response pipeline answers.
    writer.write_all(b"2e0102\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("7f2e11"));

    trigger.fire();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops after shutdown")
        .unwrap();
    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn automotive_bus_on_limited_platform_lists_stream_schemes() {
    let invocation = cli::parse_from(["vecu", "automotive-bus://can0", "synthetic"]).unwrap();
    let plan = invocation.into_plan(PlatformCapability::Limited).unwrap();

    let (_trigger, shutdown) = shutdown_channel();
    let err = launch(plan, &LauncherConfig::default(), shutdown)
        .await
        .unwrap_err();
    match &err {
        LaunchError::UnsupportedScheme { supported, .. } => {
            assert_eq!(supported, &vec![TransportScheme::Tcp])
        }
        other => panic!("expected unsupported scheme, got {other:?}"),
    }
    assert_eq!(err.category().exit_code(), 2);
}

#[test]
fn seed_and_scoped_toggle_reach_the_backend() {
    let invocation = cli::parse_from([
        "vecu",
        "tcp://127.0.0.1:0",
        "synthetic",
        "--seed",
        "42",
        "--use-default-response-if-suppress",
        "TesterPresent",
    ])
    .unwrap();
    let plan = invocation.into_plan(PlatformCapability::Full).unwrap();
    assert_eq!(plan.backend, BackendConfig::Synthetic(SyntheticConfig { seed: 42 }));

    let backend = build_backend(plan.backend, &plan.overrides).unwrap();
    let toggle = backend.with(|b| b.defaults().suppress.clone()).unwrap();
    assert_eq!(
        toggle,
        ServiceToggle::Only([ServiceId::TESTER_PRESENT].into_iter().collect())
    );
}

#[tokio::test]
async fn hostile_expression_fails_before_any_backend_exists() {
    let missing = std::env::temp_dir().join(format!("vecu-never-{}.json", std::process::id()));
    let invocation = cli::parse_from([
        "vecu",
        "isotp://can0",
        "db",
        missing.to_str().unwrap(),
        "--use-default-response-if-none",
        "os.system('x')",
    ])
    .unwrap();
    let plan = invocation.into_plan(PlatformCapability::Limited).unwrap();

    let (_trigger, shutdown) = shutdown_channel();
    let err = launch(plan, &LauncherConfig::default(), shutdown)
        .await
        .unwrap_err();
    // Neither the missing dataset nor the unsupported scheme is reached.
    match err {
        LaunchError::Evaluation { source, .. } => {
            assert_eq!(source, EvaluationError::UnknownSymbol { name: "os".into() })
        }
        other => panic!("expected evaluation error, got {other:?}"),
    }
}
