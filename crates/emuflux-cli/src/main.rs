//! CLI for emuflux: Rainforest EMU readings into InfluxDB.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "emuflux")]
#[command(about = "emuflux: forward Rainforest EMU meter readings to InfluxDB")]
#[command(version = emuflux_core::VERSION)]
struct Cli {
    /// Enable debug logging (every decoded snapshot and record)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the EMU and forward new readings until interrupted
    Run {
        /// Rainforest serial port, e.g. 'ttyACM0'
        serial_port: String,

        /// Influx host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Influx port
        #[arg(long, default_value = "8086")]
        port: u16,

        /// Influx username
        #[arg(long, default_value = "root")]
        username: String,

        /// Influx password
        #[arg(long, default_value = "root")]
        password: String,

        /// Influx database name
        #[arg(long, default_value = "rainforest")]
        db: String,

        /// Influx attempts per request on connection failure (0 means a single
        /// attempt, not retry forever)
        #[arg(long, default_value = "3")]
        retries: u32,

        /// Influx request timeout (e.g. "500ms", "10s")
        #[arg(long, default_value = "10s")]
        timeout: String,

        /// Poll interval (e.g. "10s", "1m")
        #[arg(long, default_value = "10s")]
        interval: String,

        /// Print records as JSON lines instead of writing to Influx
        #[arg(long)]
        dry_run: bool,
    },

    /// List serial ports, marking any that look like an EMU
    Ports {
        /// Include non-USB ports
        #[arg(long)]
        all: bool,
    },

    /// Decode raw hexadecimal EMU fields
    Decode {
        #[command(subcommand)]
        field: DecodeField,
    },
}

#[derive(Subcommand)]
enum DecodeField {
    /// Device timestamp (seconds since 2000-01-01T00:00:00Z)
    Timestamp {
        /// Raw hex value; omitted means 0x0
        raw: Option<String>,
    },

    /// Demand or summation reading
    Reading {
        raw: String,
        multiplier: String,
        divisor: String,
    },

    /// Price with trailing-digit scale
    Price {
        price: String,
        trailing_digits: String,
    },
}

fn main() {
    let cli = Cli::parse();
    commands::init_logging(cli.debug);

    match cli.command {
        Commands::Run {
            serial_port,
            host,
            port,
            username,
            password,
            db,
            retries,
            timeout,
            interval,
            dry_run,
        } => commands::run::run(commands::run::RunCommandConfig {
            serial_port: &serial_port,
            host: &host,
            port,
            username: &username,
            password: &password,
            database: &db,
            retries,
            timeout: &timeout,
            interval: &interval,
            dry_run,
        }),
        Commands::Ports { all } => commands::ports::run(all),
        Commands::Decode { field } => match field {
            DecodeField::Timestamp { raw } => commands::decode::timestamp(raw.as_deref()),
            DecodeField::Reading {
                raw,
                multiplier,
                divisor,
            } => commands::decode::reading(&raw, &multiplier, &divisor),
            DecodeField::Price {
                price,
                trailing_digits,
            } => commands::decode::price(&price, &trailing_digits),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["emuflux", "run", "ttyACM0"]).unwrap();
        assert!(!cli.debug);
        match cli.command {
            Commands::Run {
                serial_port,
                host,
                port,
                db,
                retries,
                interval,
                dry_run,
                ..
            } => {
                assert_eq!(serial_port, "ttyACM0");
                assert_eq!(host, "localhost");
                assert_eq!(port, 8086);
                assert_eq!(db, "rainforest");
                assert_eq!(retries, 3);
                assert_eq!(interval, "10s");
                assert!(!dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_serial_port() {
        assert!(Cli::try_parse_from(["emuflux", "run"]).is_err());
    }

    #[test]
    fn test_retries_help_explains_zero() {
        let cmd = Cli::command();
        let run = cmd.find_subcommand("run").unwrap();
        let retries = run
            .get_arguments()
            .find(|a| a.get_id() == "retries")
            .unwrap();
        let help = retries.get_help().unwrap().to_string();
        assert!(help.contains("0 means a single"));
    }

    #[test]
    fn test_ports_all_flag() {
        let cli = Cli::try_parse_from(["emuflux", "ports", "--all"]).unwrap();
        assert!(matches!(cli.command, Commands::Ports { all: true }));
    }

    #[test]
    fn test_debug_flag_is_global() {
        let cli = Cli::try_parse_from(["emuflux", "run", "ttyUSB0", "--debug"]).unwrap();
        assert!(cli.debug);
    }
}
