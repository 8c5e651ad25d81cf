use std::process::Command;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_vecu"))
}

#[test]
fn unknown_symbol_in_override_exits_with_evaluation_error() {
    let output = cli()
        .args([
            "tcp://127.0.0.1:0",
            "synthetic",
            "--use-default-response-if-none",
            "os.system('x')",
        ])
        .env("VECU_LOG", "off")
        .output()
        .expect("run vecu");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("'os'"), "expected unknown symbol in {stderr}");
}

#[test]
fn unknown_scheme_is_a_usage_error() {
    let output = cli()
        .args(["carrier-pigeon://coop", "synthetic"])
        .env("VECU_LOG", "off")
        .output()
        .expect("run vecu");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("carrier-pigeon"), "got {stderr}");
}

#[test]
fn unknown_option_is_rejected_by_the_parser() {
    let output = cli()
        .args(["tcp://127.0.0.1:0", "synthetic", "--use-default-response-if-sunny", "True"])
        .output()
        .expect("run vecu");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn synthetic_option_is_unknown_to_storage_backend() {
    let output = cli()
        .args(["tcp://127.0.0.1:0", "db", "data.json", "--p-service", "0.5"])
        .output()
        .expect("run vecu");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_dataset_is_a_configuration_error() {
    let missing = std::env::temp_dir().join(format!("vecu-missing-{}.json", std::process::id()));
    let output = cli()
        .args(["tcp://127.0.0.1:0", "storage-backed", missing.to_str().unwrap()])
        .env("VECU_LOG", "off")
        .output()
        .expect("run vecu");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr utf8");
    assert!(stderr.contains("does not exist"), "got {stderr}");
}

#[test]
fn help_lists_generated_options() {
    let output = cli()
        .args(["tcp://127.0.0.1:0", "synthetic", "--help"])
        .output()
        .expect("run vecu");
    assert!(output.status.success());
    let help = String::from_utf8(output.stdout).expect("stdout utf8");

    for flag in [
        "--seed",
        "--p-service",
        "--mandatory-sessions",
        "--use-default-response-if-suppress",
    ] {
        assert!(help.contains(flag), "{flag} missing from help:\n{help}");
    }
}
