//! The ELF64 driver: phases 1–2 (reading and classifying inputs) and the
//! glue that hands a populated [`Module`] to [`crate::pipeline::run`] and
//! then to [`crate::writer`].

use std::path::PathBuf;

use ferrum_errors::error;

use crate::{
    configuration::Configuration,
    ingest,
    module::Module,
    pipeline::{self, NoopHooks},
    relocator::X86_64Relocator,
    script::parser::parse_script,
    writer,
};

error! {
    #[doc = "Elf64 errors."]
    pub enum Error {
        #[transparent]
        Ingest(#[from] ingest::Error),

        #[code = E006]
        #[message = "I was not able to parse the linker script."]
        #[formatted_message("I was not able to parse the linker script at `{0}`.")]
        #[help = "Double check the script's syntax."]
        ScriptParse(PathBuf),

        #[code = E007]
        #[message = "I was not able to read the linker script from disk."]
        #[formatted_message("I was not able to read `{0}` from disk.")]
        #[help = "Double check the path exists and is readable."]
        ScriptIo(PathBuf),

        #[code = E008]
        #[message = "Linking failed; see the diagnostics above."]
        #[help = "Check the errors and warnings reported during the link for the actual cause."]
        Failed,

        #[transparent]
        Write(#[from] writer::Error),
    }
}

pub(crate) fn link(configuration: Configuration) -> Result<(), Error> {
    let mut module = Module::new(false);
    module.required_undefined = configuration.undefined_symbols.clone();
    module.wrapped_symbols = configuration.wrapped_symbols.clone();

    if let Some(script_path) = &configuration.linker_script {
        let source = std::fs::read_to_string(script_path).map_err(|_| Error::ScriptIo(script_path.clone()))?;
        let (_, script) =
            parse_script(&source).map_err(|_| Error::ScriptParse(script_path.clone()))?;
        module.script = Some(script);
    }

    ingest::ingest_all(&mut module, &configuration)?;

    let relocator = X86_64Relocator;
    let layout_result = pipeline::run(&mut module, &configuration, &relocator, &mut NoopHooks);

    if module.diagnostics.has_failed() {
        return Err(Error::Failed);
    }

    writer::write(&module, &configuration, &layout_result)?;
    Ok(())
}
