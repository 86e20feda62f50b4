#[macro_use] extern crate log;

use std::fs;
use std::path::Path;
use clap::{App, Arg, ArgMatches};
use bfjit::{BrainfuckError, GeneratedProgram, Instruction};
use bfjit::backend::Backend;
use bfjit::backend::recording::RecordingBackend;
use bfjit::compiler::{CompilerBuilder, DEFAULT_TAPE_SIZE};

/// Settings collected from the command line.
struct Options<'a> {
    path: &'a str,
    tape_size: usize,
    backend: &'a str,
    optimization_level: u32,
    dump: bool
}

impl<'a> Options<'a> {

    fn from_matches(matches: &'a ArgMatches<'a>) -> Result<Options<'a>, BrainfuckError> {
        let tape_size = matches.value_of("tape-size").unwrap_or("")
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0 && *n <= i32::max_value() as usize)
            .ok_or("The tape size must be a positive number less than 2^31.")?;
        let optimization_level = matches.value_of("opt-level").unwrap_or("")
            .parse::<u32>()
            .ok()
            .filter(|n| *n <= 3)
            .ok_or("The optimization level must be a number between 0 and 3.")?;
        let options = Options {
            path: matches.value_of("INPUT").unwrap_or_default(),
            tape_size,
            backend: matches.value_of("backend").unwrap_or("native"),
            optimization_level,
            dump: matches.is_present("dump")
        };
        if options.backend == "native" && !options.dump {
            check_native_tape_size(options.tape_size)?;
        }
        Ok(options)
    }

}

// The native backend keeps the tape in the stack frame of the routine
#[cfg(all(target_arch = "x86_64", not(windows)))]
fn check_native_tape_size(tape_size: usize) -> Result<(), BrainfuckError> {
    use bfjit::backend::native::MAX_BUFFER_SIZE;
    if tape_size > MAX_BUFFER_SIZE {
        return Err(format!("The native backend supports tapes of at most {} cells.", MAX_BUFFER_SIZE).into());
    }
    Ok(())
}

#[cfg(not(all(target_arch = "x86_64", not(windows))))]
fn check_native_tape_size(_tape_size: usize) -> Result<(), BrainfuckError> {
    Ok(())
}

fn generate<B: Backend>(backend: B, instructions: &[Instruction], tape_size: usize) -> Result<GeneratedProgram<B>, BrainfuckError> {
    debug!("Generating code.");
    CompilerBuilder::new()
        .tape_size(tape_size)
        .build(backend)
        .compile_instructions(instructions)?
        .finish()
}

#[cfg(all(target_arch = "x86_64", not(windows)))]
fn run_native(instructions: &[Instruction], options: &Options) -> Result<(), BrainfuckError> {
    use bfjit::backend::native::NativeBackend;
    let program = generate(NativeBackend::new(), instructions, options.tape_size)?;
    bfjit::launch(program)
}

#[cfg(not(all(target_arch = "x86_64", not(windows))))]
fn run_native(instructions: &[Instruction], options: &Options) -> Result<(), BrainfuckError> {
    warn!("No native backend for this platform, evaluating the program instead.");
    let program = generate(RecordingBackend::new(), instructions, options.tape_size)?;
    bfjit::launch(program)
}

#[cfg(feature = "llvm")]
fn run_llvm(instructions: &[Instruction], options: &Options) -> Result<(), BrainfuckError> {
    use bfjit::backend::llvm::LlvmBackend;
    use bfjit::host::{InputTarget, OutputTarget};
    let context = inkwell::context::Context::create();
    let backend = LlvmBackend::new(&context, options.optimization_level, InputTarget::Stdin, OutputTarget::Stdout);
    let program = generate(backend, instructions, options.tape_size)?;
    bfjit::launch(program)
}

#[cfg(feature = "llvm")]
fn dump_llvm(instructions: &[Instruction], options: &Options) -> Result<(), BrainfuckError> {
    use bfjit::backend::llvm::LlvmBackend;
    use bfjit::host::{InputTarget, OutputTarget};
    let context = inkwell::context::Context::create();
    let backend = LlvmBackend::new(&context, options.optimization_level, InputTarget::Stdin, OutputTarget::Stdout);
    let program = generate(backend, instructions, options.tape_size)?;
    print!("{}", program.backend().dump());
    Ok(())
}

#[cfg(not(feature = "llvm"))]
fn run_llvm(_instructions: &[Instruction], _options: &Options) -> Result<(), BrainfuckError> {
    Err(NO_LLVM.into())
}

#[cfg(not(feature = "llvm"))]
fn dump_llvm(_instructions: &[Instruction], _options: &Options) -> Result<(), BrainfuckError> {
    Err(NO_LLVM.into())
}

#[cfg(not(feature = "llvm"))]
const NO_LLVM: &str = "This build does not include the LLVM backend. Rebuild with `--features llvm`.";

fn main_execute(options: &Options) -> Result<(), BrainfuckError> {

    // Read and fold the source
    debug!("Opening {}.", options.path);
    let source = fs::read(options.path).map_err(|source| BrainfuckError::SourceRead {
        path: Path::new(options.path).to_owned(),
        source
    })?;
    let instructions = bfjit::optimize(&source);
    info!("{} instructions after folding.", instructions.len());

    // Print the generated code instead of running it
    if options.dump {
        if options.backend == "llvm" {
            return dump_llvm(&instructions, options);
        }
        let program = generate(RecordingBackend::new(), &instructions, options.tape_size)?;
        print!("{}", program.backend());
        return Ok(());
    }

    match options.backend {
        "native" => run_native(&instructions, options),
        "llvm" => run_llvm(&instructions, options),
        other => Err(format!("Unknown backend: {}", other).into())
    }

}

fn main() {

    // All the cli options are here
    let default_tape_size = DEFAULT_TAPE_SIZE.to_string();
    let matches = App::new("bfjit")
        .version("0.1.0")
        .author("Marco Cameriero")
        .about("A just-in-time Brainfuck compiler")
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to use")
                .required(true)
                .index(1)
        )
        .arg(
            Arg::with_name("tape-size")
                .short("t")
                .long("tape-size")
                .takes_value(true)
                .default_value(&default_tape_size)
                .help("Number of cells of the tape")
        )
        .arg(
            Arg::with_name("backend")
                .short("b")
                .long("backend")
                .takes_value(true)
                .possible_values(&["native", "llvm"])
                .default_value("native")
                .help("Code generator to use")
        )
        .arg(
            Arg::with_name("opt-level")
                .short("O")
                .long("opt-level")
                .takes_value(true)
                .default_value("2")
                .help("LLVM optimization level, from 0 to 3")
        )
        .arg(
            Arg::with_name("dump")
                .short("d")
                .long("dump")
                .help("Prints the generated operations (LLVM IR with `-b llvm`) instead of running the program")
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity. Repeat to increase.")
        )
        .get_matches();

    // Initialize logger as soon as possible
    let verbosity = match matches.occurrences_of("v") {
        0     => "warn",
        1     => "info",
        2     => "debug",
        _     => "trace"
    };
    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("BFJIT_LOG", format!("bfjit={}", verbosity))
            .write_style_or("BFJIT_LOG_STYLE", "auto")
    )
    .init();

    let res = Options::from_matches(&matches).and_then(|options| main_execute(&options));

    if let Err(e) = res {
        error!("{}", e);
        std::process::exit(1);
    }
}
