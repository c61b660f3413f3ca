use std::{
    io::{BufWriter, stdout},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use mtrace::{DecodeError, RenderOptions};
use mtrace_dump::{DumpOptions, ForcedFormat, OutputFormat};

/// Exit status for decode errors the library treats as recoverable.
const EXIT_RECOVERABLE: u8 = 2;

/// Dumps malloc trace files in either raw or workload format.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the trace file
    trace: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Decode as the given format instead of guessing
    #[arg(long, value_enum)]
    force: Option<ForcedFormat>,

    /// Also print raw records of kind `unused`
    #[arg(long)]
    show_unused: bool,

    /// Skip raw records with an unknown kind instead of stopping
    #[arg(short, long)]
    keep_going: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> DumpOptions {
        DumpOptions {
            output: self.format,
            force: self.force,
            render: RenderOptions::default()
                .show_unused(self.show_unused)
                .keep_going(self.keep_going),
        }
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = mtrace_dump::logging::init(args.verbose) {
        eprintln!("Unable to initialize logging: {e}");
    }

    let writer = BufWriter::new(stdout().lock());
    match mtrace_dump::dump_file(&args.trace, &args.options(), writer) {
        Ok(format) => {
            log::info!("Finished dumping {format}");
            ExitCode::SUCCESS
        }
        Err(e) => match e.downcast_ref::<DecodeError>() {
            Some(decode_error) if decode_error.is_fatal() => {
                eprintln!("Error: {decode_error}, trace framing is lost");
                ExitCode::FAILURE
            }
            Some(decode_error) => {
                eprintln!("Error: {decode_error}");
                ExitCode::from(EXIT_RECOVERABLE)
            }
            None => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}
