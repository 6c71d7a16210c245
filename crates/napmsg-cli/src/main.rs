//! nap-msg: send chat messages through a NapCat gateway
//!
//! Usage:
//!   nap-msg send <user_id> -t "hello" -i ./cat.png
//!   nap-msg send-group <group_id> -t "hi all" --forward
//!   nap-msg rpc

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgMatches, CommandFactory, FromArgMatches};
use napmsg_asr::{AsrClient, AsrConfig};
use napmsg_gateway::{
    ChatId, NapcatEvents, NapcatRelay, RelayConfig, Segment, forward_node,
    send_group_forward_message, send_group_message, send_private_message,
};
use napmsg_rpc::{Outbox, RpcServer};
use serde_json::Value;
use tokio::io::BufReader;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, GroupMode, SegmentKind, ordered_segments};

/// Nothing to send
const EXIT_NO_SEGMENTS: u8 = 2;

fn init_tracing(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    if let Err(e) = init_tracing(&cli) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }
    debug!("nap-msg v{} starting", env!("CARGO_PKG_VERSION"));

    match run(cli, &matches).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, matches: &ArgMatches) -> Result<ExitCode> {
    let config = RelayConfig::from_env()
        .with_url(cli.napcat_url)
        .with_timeout(cli.timeout);

    match cli.command {
        Commands::Send { user_id, segments } => {
            let Some(segments) = build_segments(&ordered_segments(&segments, matches))? else {
                return Ok(ExitCode::from(EXIT_NO_SEGMENTS));
            };
            let user_id = ChatId::new(&user_id).context("user_id must not be empty")?;
            let target = config.target(None, None)?;
            let message = Value::Array(segments.iter().map(Segment::to_value).collect());
            let response = send_private_message(&NapcatRelay, &target, &user_id, message)
                .await
                .context("Failed to send message")?;
            print_response(&response)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::SendGroup {
            group_id,
            segments,
            mode,
            forward,
        } => {
            let Some(segments) = build_segments(&ordered_segments(&segments, matches))? else {
                return Ok(ExitCode::from(EXIT_NO_SEGMENTS));
            };
            let group_id = ChatId::new(&group_id).context("group_id must not be empty")?;
            let target = config.target(None, None)?;

            let response = if forward || mode == GroupMode::Forward {
                let nodes = segments
                    .iter()
                    .map(|s| {
                        forward_node(
                            &config.forward_user_id,
                            &config.forward_nickname,
                            std::slice::from_ref(s),
                        )
                    })
                    .collect();
                send_group_forward_message(&NapcatRelay, &target, &group_id, Value::Array(nodes))
                    .await
            } else {
                let message = Value::Array(segments.iter().map(Segment::to_value).collect());
                send_group_message(&NapcatRelay, &target, &group_id, message).await
            }
            .context("Failed to send message")?;
            print_response(&response)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rpc => {
            run_rpc(config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `None` when no segment flags were given
fn build_segments(raw: &[(SegmentKind, String)]) -> Result<Option<Vec<Segment>>> {
    if raw.is_empty() {
        eprintln!("No message segments given; use -t, -i, -f, -v or -r");
        return Ok(None);
    }

    let mut segments = Vec::with_capacity(raw.len());
    let mut failures = Vec::new();
    for (kind, value) in raw {
        match kind.build(value) {
            Ok(segment) => segments.push(segment),
            Err(e) => failures.push(e.to_string()),
        }
    }
    if !failures.is_empty() {
        anyhow::bail!("Invalid message segments: {}", failures.join("; "));
    }
    Ok(Some(segments))
}

fn print_response(response: &Value) -> Result<()> {
    let line = serde_json::to_string(response).context("Failed to encode response")?;
    println!("{line}");
    Ok(())
}

async fn run_rpc(config: RelayConfig) -> Result<()> {
    let asr_config = AsrConfig::from_env();
    let asr = if asr_config.is_enabled() {
        info!("Voice transcription enabled (engine {})", asr_config.engine);
        Some(Arc::new(AsrClient::new(asr_config)?))
    } else {
        None
    };

    let mut server = RpcServer::new(
        config,
        asr,
        Arc::new(NapcatRelay),
        Arc::new(NapcatEvents),
        Outbox::stdout(),
    )?;
    server
        .serve(BufReader::new(tokio::io::stdin()))
        .await
        .context("RPC server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_segments_empty() {
        assert!(build_segments(&[]).unwrap().is_none());
    }

    #[test]
    fn test_build_segments_in_order() {
        let raw = vec![
            (SegmentKind::Reply, "3".to_string()),
            (SegmentKind::Text, "hi".to_string()),
            (SegmentKind::Image, "https://example.com/a.png".to_string()),
        ];
        let segments = build_segments(&raw).unwrap().unwrap();
        let kinds: Vec<_> = segments.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, ["reply", "text", "image"]);
    }

    #[test]
    fn test_build_segments_reports_every_failure() {
        let raw = vec![
            (SegmentKind::Text, "ok".to_string()),
            (SegmentKind::Image, "/missing/a.png".to_string()),
            (SegmentKind::Video, "".to_string()),
        ];
        let err = build_segments(&raw).unwrap_err().to_string();
        assert!(err.contains("image file not found"), "{err}");
        assert!(err.contains("video source is empty"), "{err}");
    }
}
