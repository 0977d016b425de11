//! wifihal-ctl - talk to the WiFi HAL control socket.
//!
//! Attaches monitors, injects allow-listed netlink messages and prints
//! events the HAL forwards.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use wifihal::ctrl::wire::EventHeader;
use wifihal::ctrl::{CtrlClient, CtrlFamily};
use wifihal::netlink::genl::{GenlMsgHdr, query_family};
use wifihal::netlink::{MessageBuilder, NetlinkSocket, Protocol};
use wifihal::nl80211::{
    NL80211_ATTR_FRAME_MATCH, NL80211_ATTR_FRAME_TYPE, NL80211_CMD_REGISTER_ACTION,
    NL80211_FAMILY, qca,
};

/// Management frame type/subtype for action frames.
const ACTION_FRAME_TYPE: u16 = 0x00d0;

#[derive(Parser)]
#[command(name = "wifihal-ctl", version, about = "WiFi HAL control socket client")]
struct Cli {
    /// HAL control socket.
    #[arg(short, long, default_value = wifihal::config::DEFAULT_CTRL_SOCKET_PATH)]
    socket: PathBuf,

    /// Local socket path to bind (default: a per-process temp path).
    #[arg(short, long)]
    local: Option<PathBuf>,

    /// Reply timeout in milliseconds.
    #[arg(short, long, default_value_t = 5000)]
    timeout: u64,

    /// Output JSON.
    #[arg(short, long, global = true)]
    json: bool,

    /// Raise log verbosity.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register as a monitor.
    Attach(Target),
    /// Remove a monitor registration.
    Detach(Target),
    /// Ask the HAL to send a netlink message to the kernel.
    Send(SendArgs),
    /// Attach and print forwarded events until interrupted.
    Monitor(Target),
}

#[derive(Clone, Copy, ValueEnum)]
enum Family {
    /// nl80211 frames.
    Generic,
    /// cld80211 OEM messages.
    Cld80211,
}

impl From<Family> for CtrlFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::Generic => CtrlFamily::Generic,
            Family::Cld80211 => CtrlFamily::Cld80211,
        }
    }
}

#[derive(Args)]
struct Target {
    /// Protocol family.
    #[arg(short, long, value_enum, default_value = "generic")]
    family: Family,

    /// Command id (nl80211 command or cld80211 message type).
    #[arg(short, long)]
    cmd: Option<u32>,

    /// Action frame body prefix, in hex. Registers for action frames.
    #[arg(short = 'm', long = "match", value_parser = parse_hex)]
    frame_match: Option<HexBytes>,

    /// nl80211 family id (default: resolved from the kernel).
    #[arg(long)]
    family_id: Option<u16>,
}

#[derive(Args)]
struct SendArgs {
    #[command(flatten)]
    target: Target,

    /// Complete netlink message, in hex (default: build REGISTER_ACTION from --match).
    #[arg(long, value_parser = parse_hex)]
    data: Option<HexBytes>,

    /// Also register as a monitor.
    #[arg(short, long)]
    attach: bool,
}

/// Bytes given on the command line in hex.
#[derive(Clone)]
struct HexBytes(Vec<u8>);

fn parse_hex(s: &str) -> Result<HexBytes, String> {
    let digits: String = s.chars().filter(|c| !matches!(c, ':' | ' ' | '-')).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", s));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| format!("invalid hex in {:?}", s))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(HexBytes)
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

impl Target {
    /// Command id and request payload for this target.
    async fn request(&self) -> anyhow::Result<(u32, Vec<u8>)> {
        match (self.family, &self.frame_match) {
            (Family::Generic, Some(HexBytes(frame_match))) => {
                let family_id = match self.family_id {
                    Some(id) => id,
                    None => nl80211_id().await?,
                };
                Ok((
                    u32::from(NL80211_CMD_REGISTER_ACTION),
                    register_action(family_id, frame_match),
                ))
            }
            (Family::Cld80211, Some(_)) => bail!("--match only applies to the generic family"),
            (Family::Generic, None) => {
                let cmd = self.cmd.context("--cmd or --match is required")?;
                Ok((cmd, Vec::new()))
            }
            (Family::Cld80211, None) => {
                Ok((self.cmd.unwrap_or(u32::from(qca::WLAN_NL_MSG_OEM)), Vec::new()))
            }
        }
    }
}

async fn nl80211_id() -> anyhow::Result<u16> {
    let socket = NetlinkSocket::new(Protocol::Generic)?;
    let family = query_family(&socket, NL80211_FAMILY)
        .await
        .context("resolving nl80211 (use --family-id)")?;
    Ok(family.id)
}

fn register_action(family_id: u16, frame_match: &[u8]) -> Vec<u8> {
    let mut builder = MessageBuilder::new(family_id, 0);
    builder.append(&GenlMsgHdr::new(NL80211_CMD_REGISTER_ACTION, 0));
    builder.append_attr_u16(NL80211_ATTR_FRAME_TYPE, ACTION_FRAME_TYPE);
    builder.append_attr(NL80211_ATTR_FRAME_MATCH, frame_match);
    builder.finish()
}

fn report(json: bool, action: &str, status: i32) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::json!({ "action": action, "status": status }));
    } else {
        println!("{}: status {}", action, status);
    }
    if status != 0 {
        bail!("{} failed with status {}", action, status);
    }
    Ok(())
}

fn print_event(json: bool, header: &EventHeader, data: &[u8]) -> anyhow::Result<()> {
    if json {
        let output = serde_json::json!({
            "family": header.family,
            "cmd_id": header.cmd_id,
            "len": header.data_len,
            "data": hex(data),
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "family {} cmd {} len {}: {}",
            header.family,
            header.cmd_id,
            header.data_len,
            hex(data)
        );
    }
    Ok(())
}

async fn monitor(client: &mut CtrlClient, target: &Target, json: bool) -> anyhow::Result<()> {
    let family = CtrlFamily::from(target.family);
    let (cmd, data) = target.request().await?;
    report(json, "attach", client.attach(family, cmd, &data).await?)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = client.recv_event() => {
                let (header, data) = event?;
                print_event(json, &header, &data)?;
            }
        }
    }

    let status = client.detach(family, cmd, &data).await?;
    if status != 0 {
        tracing::warn!(status, "detach failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let local = cli.local.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!("wifihal-ctl-{}", std::process::id()))
    });
    let mut client = CtrlClient::bind(&cli.socket, &local)
        .with_context(|| format!("binding {}", local.display()))?
        .reply_timeout(Duration::from_millis(cli.timeout));

    match &cli.command {
        Command::Attach(target) => {
            let (cmd, data) = target.request().await?;
            let status = client.attach(target.family.into(), cmd, &data).await?;
            report(cli.json, "attach", status)
        }
        Command::Detach(target) => {
            let (cmd, data) = target.request().await?;
            let status = client.detach(target.family.into(), cmd, &data).await?;
            report(cli.json, "detach", status)
        }
        Command::Send(args) => {
            let (cmd, built) = args.target.request().await?;
            let msg = args.data.clone().map_or(built, |d| d.0);
            if msg.is_empty() {
                bail!("nothing to send: pass --data or --match");
            }
            let status = client
                .send_nl_data(args.target.family.into(), cmd, &msg, args.attach)
                .await?;
            report(cli.json, "send", status)
        }
        Command::Monitor(target) => monitor(&mut client, target, cli.json).await,
    }
}
