use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "fss",
    version = env!("FSS_VERSION"),
    about = "File-system state tracker for an incremental build driver",
    after_help = "Examples:\n  fss dirty src/Foo.java\n  fss round\n  fss status"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "FILE", default_value = "fss.toml")]
    pub config: Utf8PathBuf,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[arg(long, global = true, value_name = "ID", default_value = "demo-module")]
    pub target: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(
        about = "Mark a file dirty",
        long_about = "Mark a file dirty for the target's next build round.\n\nExample:\n  fss dirty src/Foo.java"
    )]
    Dirty(DirtyArgs),
    #[command(about = "Record a file deletion")]
    Deleted(DeletedArgs),
    #[command(
        about = "Run one build round",
        long_about = "Advance the round overlay, process every currently-dirty file for the target, and report what would be recompiled.\n\nExample:\n  fss round"
    )]
    Round,
    #[command(about = "Mark every currently-dirty file up to date")]
    Settle,
    #[command(about = "Report has-work-to-do / has-unprocessed-changes for the target")]
    Status,
    #[command(about = "Clear all tracked state")]
    Clear,
}

#[derive(Args, Debug, Default)]
pub struct DirtyArgs {
    #[arg(value_name = "PATH")]
    pub file: Utf8PathBuf,

    #[arg(long, default_value_t = false)]
    pub if_not_deleted: bool,
}

#[derive(Args, Debug, Default)]
pub struct DeletedArgs {
    #[arg(value_name = "PATH")]
    pub file: Utf8PathBuf,
}
