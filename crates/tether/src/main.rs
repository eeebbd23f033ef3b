//! # tether
//!
//! Session server binary: loads settings, initialises logging, and serves
//! an echo endpoint plus a `/broadcast` room.

#![deny(unsafe_code)]

mod apps;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tether_server::{SessionGroup, ServerConfig, TetherServer};
use tether_settings::TetherSettings;
use tracing::info;

/// Prefix of the demo room where every message reaches every session.
const BROADCAST_PREFIX: &str = "/broadcast";

/// Tether session server.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "Tether session server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Prefix of the echo endpoint (overrides settings).
    #[arg(long)]
    prefix: Option<String>,

    /// Path to the settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level or `EnvFilter` directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings, then layer the command-line overrides on top.
    fn resolve_settings(&self) -> Result<TetherSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(tether_settings::settings_path);
        let mut settings = tether_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(prefix) = &self.prefix {
            settings.server.prefix.clone_from(prefix);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        Ok(settings)
    }
}

/// Build the server with both demo endpoints mounted.
fn build_server(settings: &TetherSettings) -> TetherServer {
    let mut server = TetherServer::new(ServerConfig::from(settings));
    let _ = server.mount(&settings.server.prefix, apps::echo());
    let _ = server.mount(BROADCAST_PREFIX, apps::broadcast(Arc::new(SessionGroup::new())));
    server
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;

    if settings.logging.json {
        tether_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        tether_core::logging::init_subscriber(&settings.logging.level);
    }

    let server = build_server(&settings);
    let listener = server.bind().await.with_context(|| {
        format!(
            "Failed to bind {}:{}",
            settings.server.host, settings.server.port
        )
    })?;
    info!(
        echo = %settings.server.prefix,
        broadcast = BROADCAST_PREFIX,
        "starting tether"
    );

    let _ctrl_c = server.shutdown().shutdown_on_ctrl_c();
    server.serve(listener).await.context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_override_nothing() {
        let cli = Cli::parse_from(["tether"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.prefix.is_none());
        assert!(cli.settings.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn cli_parses_every_flag() {
        let cli = Cli::parse_from([
            "tether",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--prefix",
            "/sock",
            "--settings",
            "/etc/tether.json",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.prefix.as_deref(), Some("/sock"));
        assert_eq!(cli.settings, Some(PathBuf::from("/etc/tether.json")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn cli_rejects_invalid_port() {
        assert!(Cli::try_parse_from(["tether", "--port", "70000"]).is_err());
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":7000,"prefix":"/file"},"protocol":{"verifyIp":false}}"#,
        )
        .unwrap();

        let path_arg = path.to_str().unwrap();
        let cli = Cli::parse_from(["tether", "--settings", path_arg, "--prefix", "/cli"]);
        let settings = cli.resolve_settings().unwrap();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.prefix, "/cli");
        assert!(!settings.protocol.verify_ip);
    }

    #[test]
    fn invalid_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let cli = Cli::parse_from(["tether", "--settings", path.to_str().unwrap()]);
        let err = cli.resolve_settings().unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load settings"));
    }

    #[test]
    fn both_endpoints_are_mounted() {
        let settings = TetherSettings::default();
        let server = build_server(&settings);
        let prefixes: Vec<&str> = server.endpoints().iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(prefixes, ["/echo", "/broadcast"]);
    }

    async fn post(client: &reqwest::Client, url: String, body: &'static str) -> (u16, String) {
        let resp = client.post(url).body(body).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    #[tokio::test]
    async fn broadcast_room_fans_out_messages() {
        let mut settings = TetherSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        let server = Arc::new(build_server(&settings));
        let (addr, _handle) = server.listen().await.unwrap();
        let base = format!("http://{addr}{BROADCAST_PREFIX}/000");
        let client = reqwest::Client::new();

        assert_eq!(post(&client, format!("{base}/a/xhr"), "").await.1, "o\n");
        assert_eq!(post(&client, format!("{base}/b/xhr"), "").await.1, "o\n");

        let (status, _) = post(&client, format!("{base}/a/xhr_send"), r#"["hi all"]"#).await;
        assert_eq!(status, 204);

        assert_eq!(post(&client, format!("{base}/a/xhr"), "").await.1, "a[\"hi all\"]\n");
        assert_eq!(post(&client, format!("{base}/b/xhr"), "").await.1, "a[\"hi all\"]\n");

        server.shutdown().shutdown();
    }

    #[tokio::test]
    async fn echo_endpoint_answers_sender_only() {
        let mut settings = TetherSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        let server = Arc::new(build_server(&settings));
        let (addr, _handle) = server.listen().await.unwrap();
        let base = format!("http://{addr}/echo/000");
        let client = reqwest::Client::new();

        assert_eq!(post(&client, format!("{base}/e/xhr"), "").await.1, "o\n");
        let (status, _) = post(&client, format!("{base}/e/xhr_send"), r#"["ping"]"#).await;
        assert_eq!(status, 204);
        assert_eq!(post(&client, format!("{base}/e/xhr"), "").await.1, "a[\"ping\"]\n");

        server.shutdown().shutdown();
    }
}
