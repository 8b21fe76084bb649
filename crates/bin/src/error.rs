#[cfg(feature = "fancy-errors")]
use miette::{set_hook, MietteHandlerOpts};
use miette::{Diagnostic, InstallError, Result};
use thiserror::Error;
use ferrum_errors::Error as FerrumError;

#[derive(Error, Diagnostic, Debug)]
pub(crate) enum Error {
    #[error("The argument `{0}` contains invalid Unicode data.")]
    InvalidArgumentEncoding(String),

    #[error("The program name is missing from the command-line.")]
    ProgramNameIsMissing,

    #[error("I was not able to read the command-line properly:\n{0}")]
    #[diagnostic(code(E001), help("See the command-line usage with `ferrum-ld --help`."))]
    CommandLine(String),

    #[error("I don't understand the `--orphan-handling` value `{0}`.")]
    #[diagnostic(help("Use one of `error`, `warn`, or `place`."))]
    OrphanHandling(#[from] ferrum_linker::OrphanHandlingParseError),

    #[error("I don't understand the `--build-id` value `{0}`.")]
    #[diagnostic(help("Use one of `sha1`, `md5`, `uuid`, or `fast`."))]
    BuildId(#[from] ferrum_linker::BuildIdAlgorithmParseError),
}

impl Error {
    pub(crate) fn install_and_configure() -> Result<(), InstallError> {
        #[cfg(feature = "fancy-errors")]
        set_hook(Box::new(|_| {
            Box::new(
                MietteHandlerOpts::new()
                    .with_cause_chain()
                    .footer(
                        "For more information about an error, try \
                        `ferrum-ld --explain <error>` where `<error>` \
                        has the `E[0-9]{{3}} pattern."
                            .to_string(),
                    )
                    .width(85)
                    .terminal_links(false)
                    .build(),
            )
        }))?;

        Ok(())
    }

    pub(crate) fn explain(error_code: &str) -> Result<&'static str, FerrumError> {
        FerrumError::explain(error_code)
    }
}
