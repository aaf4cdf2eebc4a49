use anyhow::Result;
use bundlewire::commands::{affected, packages, resolve};
use clap::Parser;
use std::path::PathBuf;

/// bundlewire - bundle package resolver
///
/// Installs a universe of bundles described in a JSON file, wires their
/// package imports to exporters and reports the result.
///
/// Examples:
///   bundlewire resolve universe.json
///   bundlewire affected universe.json --uninstall core
#[derive(Parser, Debug)]
#[command(author, version = env!("BUNDLEWIRE_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/bundlewire/config.json)
    #[arg(
        long = "config",
        short = 'c',
        env = "BUNDLEWIRE_CONFIG",
        value_name = "PATH",
        global = true
    )]
    pub config: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve bundles and print their states
    Resolve(ResolveArgs),

    /// Resolve every bundle and print which bundle provides each package
    Packages(PackagesArgs),

    /// Uninstall bundles and print what a refresh would touch
    Affected(AffectedArgs),
}

#[derive(clap::Args, Debug)]
pub struct ResolveArgs {
    /// Universe file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Only resolve these bundles, in order (repeatable)
    #[arg(long = "bundle", short = 'b', value_name = "NAME")]
    pub bundles: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct PackagesArgs {
    /// Universe file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct AffectedArgs {
    /// Universe file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Bundles to uninstall
    #[arg(long = "uninstall", short = 'u', value_name = "NAME", required = true, num_args = 1..)]
    pub uninstall: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = bundlewire::runtime::RealRuntime;

    match cli.command {
        Commands::Resolve(args) => resolve(runtime, cli.config, &args.file, &args.bundles)?,
        Commands::Packages(args) => packages(runtime, cli.config, &args.file)?,
        Commands::Affected(args) => affected(runtime, cli.config, &args.file, &args.uninstall)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_resolve_parsing() {
        let cli = Cli::try_parse_from(["bundlewire", "resolve", "u.json"]).unwrap();
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.file, PathBuf::from("u.json"));
                assert!(args.bundles.is_empty());
            }
            _ => panic!("Expected Resolve command"),
        }
    }

    #[test]
    fn test_cli_resolve_selected_bundles() {
        let cli = Cli::try_parse_from([
            "bundlewire",
            "resolve",
            "u.json",
            "--bundle",
            "app",
            "-b",
            "web",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve(args) => assert_eq!(args.bundles, vec!["app", "web"]),
            _ => panic!("Expected Resolve command"),
        }
    }

    #[test]
    fn test_cli_affected_parsing() {
        let cli =
            Cli::try_parse_from(["bundlewire", "affected", "u.json", "--uninstall", "a", "b"])
                .unwrap();
        match cli.command {
            Commands::Affected(args) => assert_eq!(args.uninstall, vec!["a", "b"]),
            _ => panic!("Expected Affected command"),
        }
    }

    #[test]
    fn test_cli_affected_requires_uninstall() {
        assert!(Cli::try_parse_from(["bundlewire", "affected", "u.json"]).is_err());
    }

    #[test]
    fn test_cli_global_config_parsing() {
        let cli =
            Cli::try_parse_from(["bundlewire", "--config", "/etc/bw.json", "packages", "u.json"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/bw.json")));
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["bundlewire", "u.json"]).is_err());
    }
}
