use framerec::*;

use std::path::PathBuf;

use clap::Parser;

/// Recover stack-frame layouts from lifted IR
#[derive(Parser, Debug)]
#[clap(about, version, author)]
enum Args {
    /// Recover layouts from a textual IL listing
    FromIl {
        /// Path to an IL listing (see `il_parser` for the format)
        il_file: PathBuf,
        /// Path to output file for the per-function layout report
        #[clap(long)]
        output: Option<PathBuf>,
        /// Output all recovered layout trees as a GraphViz `.dot` file to the given path
        #[clap(long)]
        debug_output_graphviz: Option<PathBuf>,
        /// Disable terminal logging, even for high severity alerts. Strongly discouraged for
        /// normal use.
        #[clap(long)]
        debug_disable_terminal_logging: bool,
        /// Force blocking for terminal logging. If too many messages are being spewed the
        /// logger, by default, does not block, but instead dumps a dropped-messages alert. This
        /// option forces it to block and dump even if too many are being sent.
        #[clap(long)]
        debug_forced_blocking_terminal_logging: bool,
        /// Path to send log (as JSON) to
        ///
        /// Error or higher severity alerts will still continue being shown at stderr (in
        /// addition to being added to the log)
        #[clap(long = "--log")]
        log_file: Option<PathBuf>,
        /// Debug level (repeat for more: 0-warn, 1-info, 2-debug, 3-trace)
        #[clap(short, long, parse(from_occurrences))]
        debug: usize,
        /// Advanced configuration options to tweak the analysis behavior
        #[clap(short = 'Z', long, arg_enum)]
        advanced_config: Vec<analysis_config::CommandLineAnalysisConfig>,
    },
}

fn main() {
    let args = Args::parse();

    match args {
        Args::FromIl {
            il_file,
            output,
            debug_output_graphviz,
            debug_disable_terminal_logging,
            debug_forced_blocking_terminal_logging,
            log_file,
            debug,
            advanced_config,
        } => {
            let _log_guard = slog_scope::set_global_logger(crate::log::FileAndTermDrain::new(
                debug,
                debug_disable_terminal_logging,
                debug_forced_blocking_terminal_logging,
                log_file,
            ));

            let mut config: analysis_config::AnalysisConfig = advanced_config.into();
            config.collect_graphviz = debug_output_graphviz.is_some();

            let prog = il_parser::lift_from(
                &std::fs::read_to_string(il_file).expect("IL file could not be read"),
            );

            let report = locals_analysis::identify_locals(&prog, &config);

            if let Some(path) = debug_output_graphviz {
                use std::io::Write;
                write!(
                    std::fs::File::create(path).unwrap(),
                    "{}",
                    report.graphviz.as_deref().unwrap_or_default()
                )
                .unwrap();
            }

            if let Some(path) = output {
                use std::io::Write;
                write!(std::fs::File::create(path).unwrap(), "{}", report).unwrap();
            } else {
                print!("{}", report);
            }

            log::trace!("Done");
        }
    }
}
