use std::path::Path;
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};

const SUBCOMMANDS: &[&str] = &["build", "simulate", "help"];

#[derive(Parser)]
#[command(name = "bloc", version, about = "bloc compiler")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a bloc source file to C
    Build(BuildArgs),

    /// Run the reference-lifetime simulation and print the allocation report
    Simulate(SimulateArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// bloc source file to compile
    file: String,

    /// Output path; '-' writes to stdout (default: the source path with .c)
    #[arg(short, long)]
    output: Option<String>,

    /// Compile only, don't write output (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Dump the parsed command tree
    #[arg(long)]
    ast: bool,
}

#[derive(clap::Args)]
struct SimulateArgs {
    /// bloc source file to simulate
    file: String,
}

fn main() {
    // Backwards compatibility: if the first positional arg is not a known
    // subcommand, inject "build" so `bloc file.bloc` works like
    // `bloc build file.bloc`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(first_pos) = args.iter().skip(1).find(|a| !a.starts_with('-')) {
        let first_pos = first_pos.clone();
        if !SUBCOMMANDS.contains(&first_pos.as_str()) {
            let pos = args.iter().position(|a| *a == first_pos).unwrap();
            args.insert(pos, "build".to_string());
        }
    }

    let cli = Cli::parse_from(&args);

    match cli.command {
        Command::Build(build_args) => do_build(build_args, cli.no_color),
        Command::Simulate(simulate_args) => do_simulate(simulate_args, cli.no_color),
    }
}

fn read_source(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path, e);
            process::exit(1);
        }
    }
}

fn emit_error(
    files: &SimpleFiles<String, String>,
    error: &bloc::CompileError,
    no_color: bool,
) -> ! {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let writer = StandardStream::stderr(color_choice);
    let config = term::Config::default();
    let diagnostic = error.to_diagnostic();
    let _ = term::emit_to_write_style(&mut writer.lock(), &config, files, &diagnostic);
    process::exit(1);
}

fn do_build(args: BuildArgs, no_color: bool) {
    let source = read_source(&args.file);

    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());

    // --ast: dump the parsed tree without compiling further
    if args.ast {
        let parser = bloc::parser::Parser::new(source, file_id);
        match parser.parse() {
            Ok(root) => println!("{:#?}", root),
            Err(error) => emit_error(&files, &error, no_color),
        }
        return;
    }

    let compiled = match bloc::compile(&source, file_id) {
        Ok(text) => text,
        Err(error) => emit_error(&files, &error, no_color),
    };

    if args.check {
        eprintln!("ok: {} compiled successfully", args.file);
        return;
    }

    let output = args
        .output
        .unwrap_or_else(|| default_output_path(&args.file));
    if output == "-" {
        print!("{}", compiled);
        return;
    }
    if let Err(e) = std::fs::write(&output, compiled) {
        eprintln!("error: cannot write '{}': {}", output, e);
        process::exit(1);
    }
    eprintln!("wrote {}", output);
}

fn do_simulate(args: SimulateArgs, no_color: bool) {
    let source = read_source(&args.file);

    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());

    let program = match bloc::lower_source(&source, file_id) {
        Ok(program) => program,
        Err(error) => emit_error(&files, &error, no_color),
    };

    let heap = runtime::Heap::new();
    match runtime::simulate(&program, &heap) {
        Ok(report) => {
            println!("allocated:     {}", report.allocated);
            println!("freed:         {}", report.freed);
            println!("live at end:   {}", report.live);
            println!("increments:    {}", report.increments);
            println!("decrements:    {}", report.decrements);
            println!("over-releases: {}", report.over_releases);
            println!(
                "balance:       {}",
                if report.balanced() { "ok" } else { "VIOLATED" }
            );
            if !report.balanced() {
                process::exit(1);
            }
        }
        Err(error) => {
            eprintln!("simulation error: {}", error);
            process::exit(1);
        }
    }
}

/// `foo.bloc` -> `foo.c`; anything without an extension just gains `.c`.
fn default_output_path(input: &str) -> String {
    let path = Path::new(input);
    path.with_extension("c").to_string_lossy().into_owned()
}
