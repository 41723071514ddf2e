//! Integration tests for the screenlink-rpc registry binary.
//!
//! These tests launch the built executable and talk to it through the
//! library's registration client.

use screenlink::{RegistrationClient, ServiceType};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

struct RegistryProcess {
    child: tokio::process::Child,
    location: String,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RegistryProcess {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RegistryProcess {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the registry binary and wait for its location line.
async fn start_registry(args: &[&str]) -> Result<RegistryProcess, String> {
    let binary = PathBuf::from(env!("CARGO_BIN_EXE_screenlink-rpc"));

    let mut child = tokio::process::Command::new(&binary)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn screenlink-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut location = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("REGISTRY_LOCATION=") {
                    location = Some(value.trim().to_string());
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read screenlink-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let location =
        location.ok_or_else(|| "REGISTRY_LOCATION line not emitted by screenlink-rpc".to_string())?;

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RegistryProcess {
        child,
        location,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_registry_over_tcp_with_auto_port() {
    let registry = start_registry(&["--location", "tcp+tv://127.0.0.1", "--version", "3.1"])
        .await
        .unwrap();
    assert!(registry.location.starts_with("tcp+tv://127.0.0.1:"));

    let mut client = RegistrationClient::new();
    client.start(&registry.location).unwrap();

    assert_eq!(client.exchange_version("1.0").await.unwrap(), "3.1");

    client
        .register_service("session", ServiceType::ChatIn, "unix:///tmp/chat-in")
        .await
        .unwrap();
    client
        .register_service("session", ServiceType::AccessControlOut, "tcp+tv://127.0.0.1:4100")
        .await
        .unwrap();

    let discovered = client.discover("session").await.unwrap();
    assert_eq!(discovered.communication_id, "session");
    assert_eq!(discovered.services.len(), 2);
    assert_eq!(
        discovered.location_of(ServiceType::ChatIn),
        Some("unix:///tmp/chat-in")
    );
    assert_eq!(
        discovered.location_of(ServiceType::AccessControlOut),
        Some("tcp+tv://127.0.0.1:4100")
    );

    registry.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_registry_over_unix_socket_with_default_version() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("unix://{}", dir.path().join("registry.sock").display());

    let registry = start_registry(&["--location", &url]).await.unwrap();
    assert_eq!(registry.location, url);

    let mut client = RegistrationClient::new();
    client.start(&url).unwrap();
    assert_eq!(client.exchange_version("1.0").await.unwrap(), "1.0");
    assert!(client.discover("nobody").await.unwrap().services.is_empty());

    registry.stop().await;
}

#[tokio::test]
async fn test_malformed_location_exits_without_location_line() {
    let result = start_registry(&["--location", "not a url"]).await;
    assert!(result.is_err());
}
