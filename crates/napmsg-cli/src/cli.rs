//! Command line definition

use std::path::PathBuf;

use clap::{ArgMatches, Args, Parser, Subcommand, ValueEnum};
use napmsg_gateway::{Segment, SegmentError};

#[derive(Debug, Parser)]
#[command(
    name = "nap-msg",
    version,
    about = "Relay CLI for sending messages to NapCat"
)]
pub struct Cli {
    /// NapCat WebSocket endpoint (default: env NAPCAT_URL)
    #[arg(long, global = true)]
    pub napcat_url: Option<String>,

    /// Response wait timeout in seconds (default: env NAPCAT_TIMEOUT or 10)
    #[arg(long, global = true)]
    pub timeout: Option<f64>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, env = "NAP_MSG_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a private message
    Send {
        /// Target user id
        user_id: String,
        #[command(flatten)]
        segments: SegmentArgs,
    },
    /// Send a group message
    SendGroup {
        /// Target group id
        group_id: String,
        #[command(flatten)]
        segments: SegmentArgs,
        /// Send as a normal message or as a forward message
        #[arg(long = "type", value_enum, default_value_t = GroupMode::Normal)]
        mode: GroupMode,
        /// Shortcut for --type forward
        #[arg(long)]
        forward: bool,
    },
    /// Run the JSON-RPC server on stdin/stdout
    Rpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GroupMode {
    Normal,
    Forward,
}

/// Message segment flags; repeatable. `ordered_segments` restores their
/// relative order.
#[derive(Debug, Args)]
pub struct SegmentArgs {
    /// Text segment
    #[arg(short = 't', long = "text")]
    pub text: Vec<String>,
    /// Image file path or URL
    #[arg(short = 'i', long = "image")]
    pub image: Vec<String>,
    /// File path to upload
    #[arg(short = 'f', long = "file")]
    pub file: Vec<String>,
    /// Video file path or URL
    #[arg(short = 'v', long = "video")]
    pub video: Vec<String>,
    /// Reply to a message id
    #[arg(short = 'r', long = "reply")]
    pub reply: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Image,
    File,
    Video,
    Reply,
}

impl SegmentKind {
    const ALL: [SegmentKind; 5] = [
        SegmentKind::Text,
        SegmentKind::Image,
        SegmentKind::File,
        SegmentKind::Video,
        SegmentKind::Reply,
    ];

    /// Arg id in the parsed matches
    fn id(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Video => "video",
            Self::Reply => "reply",
        }
    }

    fn values<'a>(&self, args: &'a SegmentArgs) -> &'a [String] {
        match self {
            Self::Text => &args.text,
            Self::Image => &args.image,
            Self::File => &args.file,
            Self::Video => &args.video,
            Self::Reply => &args.reply,
        }
    }

    pub fn build(&self, value: &str) -> Result<Segment, SegmentError> {
        match self {
            Self::Text => Ok(Segment::text(value)),
            Self::Image => Segment::image(value),
            Self::File => Segment::file(value),
            Self::Video => Segment::video(value),
            Self::Reply => Ok(Segment::reply(value)),
        }
    }
}

/// Segment flags in command-line order. `matches` supplies the flag
/// positions of the invoked subcommand.
pub fn ordered_segments(args: &SegmentArgs, matches: &ArgMatches) -> Vec<(SegmentKind, String)> {
    let sub = matches.subcommand().map(|(_, sub)| sub);

    let mut indexed = Vec::new();
    for kind in SegmentKind::ALL {
        let values = kind.values(args);
        if values.is_empty() {
            continue;
        }
        let positions: Vec<usize> = sub
            .and_then(|sub| sub.indices_of(kind.id()))
            .map(|indices| indices.collect())
            .unwrap_or_default();
        for (n, value) in values.iter().enumerate() {
            let position = positions.get(n).copied().unwrap_or(usize::MAX);
            indexed.push((position, kind, value.clone()));
        }
    }
    indexed.sort_by_key(|(i, _, _)| *i);
    indexed.into_iter().map(|(_, kind, v)| (kind, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};

    fn parse(args: &[&str]) -> (Cli, ArgMatches) {
        let matches = Cli::command().try_get_matches_from(args).unwrap();
        let cli = Cli::from_arg_matches(&matches).unwrap();
        (cli, matches)
    }

    fn segments_of(args: &[&str]) -> Vec<(SegmentKind, String)> {
        let (cli, matches) = parse(args);
        match &cli.command {
            Commands::Send { segments, .. } | Commands::SendGroup { segments, .. } => {
                ordered_segments(segments, &matches)
            }
            Commands::Rpc => Vec::new(),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_segments_keep_order() {
        assert_eq!(
            segments_of(&[
                "nap-msg", "send", "42", "-r", "9", "-t", "first", "-i", "a.png", "--text",
                "second",
            ]),
            vec![
                (SegmentKind::Reply, "9".to_string()),
                (SegmentKind::Text, "first".to_string()),
                (SegmentKind::Image, "a.png".to_string()),
                (SegmentKind::Text, "second".to_string()),
            ]
        );
    }

    #[test]
    fn test_send_group_modes() {
        let (cli, _) = parse(&["nap-msg", "send-group", "123", "-t", "hi", "--forward"]);
        let Commands::SendGroup { group_id, mode, forward, .. } = cli.command else {
            panic!("expected send-group");
        };
        assert_eq!(group_id, "123");
        assert_eq!(mode, GroupMode::Normal);
        assert!(forward);

        let (cli, _) = parse(&["nap-msg", "send-group", "123", "--type", "forward"]);
        assert!(matches!(cli.command, Commands::SendGroup { mode: GroupMode::Forward, .. }));

        assert_eq!(
            segments_of(&["nap-msg", "send-group", "1", "-v", "b.mp4", "-t", "x", "-f", "c"]),
            vec![
                (SegmentKind::Video, "b.mp4".to_string()),
                (SegmentKind::Text, "x".to_string()),
                (SegmentKind::File, "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let (cli, _) = parse(&["nap-msg", "rpc", "--napcat-url", "ws://gw", "--timeout", "3"]);
        assert!(matches!(cli.command, Commands::Rpc));
        assert_eq!(cli.napcat_url.as_deref(), Some("ws://gw"));
        assert_eq!(cli.timeout, Some(3.0));
    }

    #[test]
    fn test_no_segments() {
        assert!(segments_of(&["nap-msg", "send", "42"]).is_empty());
    }

    #[test]
    fn test_build_segment() {
        assert_eq!(SegmentKind::Reply.build("5").unwrap().data_str("id"), Some("5"));
        assert!(SegmentKind::Video.build("/no/such/video.mp4").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"x").unwrap();
        let seg = SegmentKind::File.build(path.to_str().unwrap()).unwrap();
        assert_eq!(seg.data_str("name"), Some("notes.txt"));
    }
}
