pub mod connector;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "element-stats")]
#[command(about = "Element value frequency statistics for an XML document corpus")]
pub struct CliConfig {
    /// Connector configuration file (Hadoop XML or key=value properties)
    pub config_path: String,

    /// Output directory; must be absent or empty
    pub output_path: String,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub log_json: bool,
}
