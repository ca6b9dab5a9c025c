//! `atlink`: talk to a modem AT port bridged over TCP.
//!
//! ```text
//! atlink --connect 192.168.1.50:2101 send AT+CSQ 'AT+COPS?'
//! atlink expect-ok AT+CREG=1
//! atlink monitor --urc +CREG: --urc '#RING' --setup AT+CREG=1
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use atlink_engine::{AtRegistry, EngineConfig, Instance, TcpTransport};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "atlink", version, about = "Send AT commands to a modem AT port bridged over TCP")]
struct Cli {
    /// YAML engine configuration
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address of the AT port
    #[arg(long, value_name = "HOST:PORT", default_value = "127.0.0.1:2101")]
    connect: String,

    /// AT instance to use
    #[arg(short, long, default_value_t = 0)]
    instance: u8,

    /// Command timeout in milliseconds (overrides the config)
    #[arg(short, long, value_name = "MS")]
    timeout: Option<u64>,

    /// Keep command exchanges out of the log
    #[arg(short, long)]
    quiet: bool,

    /// Keep commands starting with PREFIX out of the log
    #[arg(long = "silence", value_name = "PREFIX")]
    silence: Vec<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send commands and print each response
    Send {
        /// Print responses as hex
        #[arg(long)]
        hex: bool,

        /// Log the exchange even for silenced commands
        #[arg(long)]
        log: bool,

        #[arg(required = true, value_name = "COMMAND")]
        commands: Vec<String>,
    },

    /// Send commands, failing unless every response ends in OK
    ExpectOk {
        #[arg(required = true, value_name = "COMMAND")]
        commands: Vec<String>,
    },

    /// Print URCs until interrupted
    Monitor {
        /// URC header to report, e.g. +CREG:
        #[arg(short, long = "urc", required = true, value_name = "HEADER")]
        urcs: Vec<String>,

        /// Commands to send once connected, e.g. AT+CREG=1
        #[arg(long, value_name = "COMMAND")]
        setup: Vec<String>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<EngineConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = cli.timeout {
        config.default_timeout_ms = ms;
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<bool, Box<dyn Error>> {
    let config = load_config(&cli)?;
    let timeout = config.default_timeout();
    let transport = Arc::new(TcpTransport::new(cli.connect.clone()));
    let registry = AtRegistry::new(config, transport);

    if cli.quiet {
        registry.disable_all_logs();
    }
    for prefix in &cli.silence {
        registry.disable_logs_for_prefix(prefix)?;
    }

    let at = registry.instance(cli.instance)?;
    let ok = match cli.command {
        Command::Send {
            hex,
            log,
            commands,
        } => send(&at, timeout, &commands, hex, log)?,
        Command::ExpectOk { commands } => expect_ok(&at, timeout, &commands),
        Command::Monitor { urcs, setup } => monitor(&at, timeout, &urcs, &setup)?,
    };

    let stats = at.stats();
    info!(
        "AT[{}]: {} commands, {} responses, {} timeouts, {} URCs",
        at.id(),
        stats.commands_sent,
        stats.responses,
        stats.timeouts,
        stats.urcs_dispatched
    );
    registry.close_all()?;
    Ok(ok)
}

fn send(
    at: &Instance,
    timeout: Duration,
    commands: &[String],
    hex: bool,
    log: bool,
) -> Result<bool, Box<dyn Error>> {
    for cmd in commands {
        if hex {
            let rsp = at.send_command_binary(timeout, cmd)?;
            println!("{}", hex::encode(&rsp));
        } else {
            let rsp = if log {
                at.send_command_and_log(timeout, cmd)?
            } else {
                at.send_command(timeout, cmd)?
            };
            print!("{}", rsp.replace('\r', ""));
        }
    }
    Ok(true)
}

fn expect_ok(at: &Instance, timeout: Duration, commands: &[String]) -> bool {
    commands.iter().all(|cmd| {
        let ok = at.send_command_expect_ok(timeout, cmd);
        if !ok {
            error!("'{}' did not return OK", cmd);
        }
        ok
    })
}

fn monitor(
    at: &Instance,
    timeout: Duration,
    urcs: &[String],
    setup: &[String],
) -> Result<bool, Box<dyn Error>> {
    for header in urcs {
        at.add_urc_handler(header, |line| println!("{}", line))?;
    }

    // The channel opens on the first command.
    let setup: Vec<&str> = if setup.is_empty() {
        vec!["AT"]
    } else {
        setup.iter().map(String::as_str).collect()
    };
    for cmd in setup {
        if !at.send_command_expect_ok(timeout, cmd) {
            error!("Setup command '{}' failed", cmd);
            return Ok(false);
        }
    }

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;
    info!("Monitoring {} URC headers, press Ctrl-C to stop", urcs.len());
    let _ = stop_rx.recv();
    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    atlink_metrics::describe_metrics();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "atlink",
            "--connect",
            "10.0.0.2:5000",
            "-t",
            "500",
            "--silence",
            "AT#MONI",
            "-vv",
            "send",
            "--hex",
            "AT+CSQ",
            "AT+COPS?",
        ])
        .unwrap();
        assert_eq!(cli.connect, "10.0.0.2:5000");
        assert_eq!(cli.timeout, Some(500));
        assert_eq!(cli.silence, vec!["AT#MONI"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Send { hex, log, commands } => {
                assert!(hex);
                assert!(!log);
                assert_eq!(commands, vec!["AT+CSQ", "AT+COPS?"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_monitor_requires_header() {
        assert!(Cli::try_parse_from(["atlink", "monitor"]).is_err());
        let cli =
            Cli::try_parse_from(["atlink", "monitor", "-u", "+CREG:", "--setup", "AT+CREG=1"])
                .unwrap();
        assert!(matches!(cli.command, Command::Monitor { ref urcs, .. } if urcs == &["+CREG:"]));
    }

    #[test]
    fn test_timeout_overrides_config() {
        let cli = Cli::try_parse_from(["atlink", "-t", "750", "expect-ok", "AT"]).unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.default_timeout(), Duration::from_millis(750));
        assert_eq!(config.instances, 3);
    }
}
