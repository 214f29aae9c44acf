//! Startup behavior of the `az-vm-exporter` binary. None of these reach
//! Azure: each run fails, or finishes, before the first scrape.

use std::{
    net::TcpListener,
    process::{Command, Output},
};

const BIN: &str = env!("CARGO_BIN_EXE_az-vm-exporter");

const COMPLETE_ENV: [(&str, &str); 5] = [
    ("subscription_id", "00000000-0000-0000-0000-000000000000"),
    ("resource_group", "rg-test"),
    ("tenant_id", "11111111-1111-1111-1111-111111111111"),
    ("client_id", "22222222-2222-2222-2222-222222222222"),
    ("client_secret", "not-a-real-secret"),
];

fn run(args: &[&str], env: &[(&str, &str)]) -> Output {
    Command::new(BIN)
        .args(args)
        .env_clear()
        .envs(env.iter().copied())
        .output()
        .expect("binary should launch")
}

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

#[test]
fn empty_environment_exits_with_status_one() {
    let output = run(&[], &[]);
    assert_eq!(output.status.code(), Some(1));
    let text = combined(&output);
    assert!(text.contains("missing required environment variables"), "{text}");
    for key in ["subscription_id", "resource_group", "tenant_id", "client_id", "client_secret"] {
        assert!(text.contains(key), "{key} not reported: {text}");
    }
}

#[test]
fn one_missing_variable_exits_with_status_one() {
    let env: Vec<_> = COMPLETE_ENV
        .iter()
        .copied()
        .filter(|(k, _)| *k != "client_secret")
        .collect();
    let output = run(&[], &env);
    assert_eq!(output.status.code(), Some(1));
    assert!(combined(&output).contains("client_secret"));
}

#[test]
fn config_check_reports_invalid_environment() {
    let output = run(&["config-check"], &[]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn config_check_accepts_complete_environment() {
    let output = run(&["config-check"], &COMPLETE_ENV);
    assert_eq!(output.status.code(), Some(0), "{}", combined(&output));
}

#[test]
fn invalid_port_exits_with_status_one() {
    let mut env = COMPLETE_ENV.to_vec();
    env.push(("port", "not-a-port"));
    let output = run(&["config-check"], &env);
    assert_eq!(output.status.code(), Some(1));
    assert!(combined(&output).contains("port"));
}

#[test]
fn occupied_port_exits_with_status_one() {
    let occupied = TcpListener::bind("0.0.0.0:0").expect("ephemeral bind");
    let port = occupied.local_addr().expect("local addr").port().to_string();

    let mut env = COMPLETE_ENV.to_vec();
    env.push(("port", &port));
    let output = run(&[], &env);

    assert_eq!(output.status.code(), Some(1));
    assert!(combined(&output).contains("Failed to start the HTTP server"));
    drop(occupied);
}
