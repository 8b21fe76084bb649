//! `ferrum-bin` is the executable of `ferrum-ld`.
//!
//! This crate contains all the implementation to make `ferrum-ld` an executable that
//! can be used by happy users.

mod error;

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process,
};

use argh::FromArgs;
use error::Error;
use ferrum_errors::Result;
use ferrum_linker::{target::Triple, Configuration};

fn default_output_file() -> PathBuf {
    PathBuf::from("a.out")
}

/// The `ferrum-ld` command is an experimental linker: it combines several object
/// files and libraries, resolves symbols, and produces an output file.
#[derive(Debug, FromArgs)]
struct Ferrum {
    /// explain a particular error based on its code (of kind `E...`).
    #[argh(option)]
    explain: Option<String>,

    /// target triple.
    #[argh(option, short = 't', default = "Triple::host()")]
    target: Triple,

    /// input files.
    #[argh(positional)]
    input_files: Vec<PathBuf>,

    /// specify the name and location of the output file. If not specified,
    /// `a.out` is used.
    #[argh(option, short = 'o', default = "default_output_file()")]
    output_file: PathBuf,

    /// number of worker threads to use for the parallel phases. Defaults to
    /// the host's available parallelism.
    #[argh(option)]
    threads: Option<std::num::NonZeroUsize>,

    /// allow multiple definitions of the same global symbol instead of
    /// raising a fatal diagnostic.
    #[argh(switch)]
    allow_multiple_definition: bool,

    /// how to place input sections matched by no linker-script rule: `error`,
    /// `warn`, or `place` (the default).
    #[argh(option, default = "String::from(\"place\")")]
    orphan_handling: String,

    /// run the garbage collector to discard unreachable sections.
    #[argh(switch)]
    gc_sections: bool,

    /// emit a `.note.gnu.build-id` section computed with the given
    /// algorithm: `sha1`, `md5`, `uuid`, or `fast`.
    #[argh(option)]
    build_id: Option<String>,
}

impl Ferrum {
    /// Creates a new `Self` type based on [`std::env::args_os`].
    fn new() -> Result<Self, Error> {
        // Collect all arguments.
        let arguments =
            env::args_os().map(OsString::into_string).collect::<Result<Vec<_>, _>>().map_err(
                |argument| Error::InvalidArgumentEncoding(argument.to_string_lossy().to_string()),
            )?;

        // Check whether `argv` is present.
        if arguments.is_empty() {
            return Err(Error::ProgramNameIsMissing);
        }

        // Extract the base command from a path.
        let command = Path::new(&arguments[0])
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .unwrap_or(&arguments[0]);

        // Extract all arguments.
        let arguments =
            arguments.iter().skip(1).map(|argument| argument.as_str()).collect::<Vec<_>>();

        // Parse and build `Self`.
        match Ferrum::from_args(&[command], &arguments) {
            Ok(ferrum) => Ok(ferrum),
            Err(early_exit) => match early_exit.status {
                // The command was parsed successfully and the early exit is due to a flag like
                // `--help` causing early exit with output.
                Ok(()) => {
                    println!("{}", early_exit.output);

                    process::exit(0);
                }

                // The arguments were not successfully parsed.
                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }
}

fn main() -> Result<()> {
    // Install the error report and the structured logging subscriber.
    Error::install_and_configure()?;
    tracing_subscriber::fmt::init();

    // Build the command-line arguments.
    let ferrum = Ferrum::new()?;

    // Handle the `--explain` option.
    if let Some(error_code) = ferrum.explain {
        println!("{}", Error::explain(&error_code)?);

        return Ok(());
    }

    // Configure and create the linker.
    let mut configuration =
        Configuration::new(ferrum.target, ferrum.input_files, ferrum.output_file);
    configuration.allow_multiple_definition = ferrum.allow_multiple_definition;
    configuration.gc_sections = ferrum.gc_sections;

    if let Some(threads) = ferrum.threads {
        configuration.threads = threads;
    }

    configuration.orphan_handling = ferrum.orphan_handling.parse().map_err(Error::OrphanHandling)?;

    if let Some(build_id) = ferrum.build_id {
        configuration.build_id = Some(build_id.parse().map_err(Error::BuildId)?);
    }

    let linker = configuration.linker();

    // Take a deep breath, and here we are!
    linker.link()?;

    Ok(())
}
