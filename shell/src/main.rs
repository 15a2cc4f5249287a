use anyhow::{Context, bail};
use argh::FromArgs;
use pipekit::{Call, ExitCode, Registry, Shell, ShellConfig, redirect_to};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;

#[derive(FromArgs)]
/// Run a pipeline of commands: stages are separated by `|` and `> FILE`
/// sends the final output to a file. Without words, starts a prompt.
struct Cli {
    #[argh(switch, short = 'l')]
    /// print the commands every scope provides and exit
    list: bool,

    #[argh(positional, greedy)]
    /// the pipeline to run
    words: Vec<String>,
}

/// Words of one line split into stages.
#[derive(Debug, PartialEq, Eq)]
struct Pipeline {
    stages: Vec<Vec<String>>,
    funnel: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli: Cli = argh::from_env();

    let config = ShellConfig::from_env();
    let mut sh = Shell::from_config(&config, &Registry::standard())?;

    if cli.list {
        print_listing(&sh);
        return Ok(());
    }
    if cli.words.is_empty() {
        return repl(&mut sh);
    }
    let code = run_words(&sh, &cli.words)?;
    std::process::exit(code);
}

fn print_listing(sh: &Shell) {
    for listing in sh.commands() {
        println!();
        println!("{}", listing.title);
        println!("{}", "=".repeat(listing.title.len()));
        for (name, description) in listing.commands {
            println!("{}: {}", name, description);
        }
    }
}

fn repl(sh: &mut Shell) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("pipekit$ ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str())?;
                let Some(words) = shlex::split(&line) else {
                    eprintln!("pipekit: unbalanced quotes");
                    continue;
                };
                match words.first().map(String::as_str) {
                    Some("exit") => break,
                    Some("cd") => match words.get(1) {
                        Some(dir) => sh.cd(dir),
                        None => eprintln!("pipekit: cd: missing directory"),
                    },
                    Some("export") => {
                        for assignment in &words[1..] {
                            match assignment.split_once('=') {
                                Some((key, value)) => sh.export(key, value),
                                None => eprintln!("pipekit: export: expected KEY=VALUE, got '{}'", assignment),
                            }
                        }
                    }
                    Some("cmds") => print_listing(sh),
                    _ => {
                        if let Err(e) = run_words(sh, &words) {
                            eprintln!("pipekit: {:#}", e);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn run_words(sh: &Shell, words: &[String]) -> anyhow::Result<ExitCode> {
    let pipeline = split_pipeline(words)?;
    let funnel = pipeline.funnel.map(PathBuf::from);

    let mut calls = Vec::with_capacity(pipeline.stages.len());
    for argv in &pipeline.stages {
        let (name, args) = argv.split_first().context("empty command in pipeline")?;
        calls.push(sh.resolve(name).call(args.iter().cloned())?);
    }
    let mut calls = calls.into_iter();
    let first = calls.next().context("empty pipeline")?;
    let mut call = match calls.next() {
        Some(second) => with_funnel(calls.fold(first.pipe(second), |acc, next| acc.pipe(next)), funnel),
        None => with_funnel(first, funnel),
    };
    Ok(call.run()?)
}

fn with_funnel(call: impl Call + 'static, funnel: Option<PathBuf>) -> Box<dyn Call> {
    match funnel {
        Some(path) => Box::new(redirect_to(call, path)),
        None => Box::new(call),
    }
}

fn split_pipeline(words: &[String]) -> anyhow::Result<Pipeline> {
    let mut stages = vec![Vec::new()];
    let mut funnel = None;
    let mut words = words.iter();
    while let Some(word) = words.next() {
        if funnel.is_some() {
            bail!("unexpected '{}' after the output file", word);
        }
        match word.as_str() {
            "|" => stages.push(Vec::new()),
            ">" => {
                let file = words.next().context("missing file name after '>'")?;
                funnel = Some(file.clone());
            }
            _ => {
                if let Some(stage) = stages.last_mut() {
                    stage.push(word.clone());
                }
            }
        }
    }
    if stages.iter().any(Vec::is_empty) {
        bail!("empty command in pipeline");
    }
    Ok(Pipeline { stages, funnel })
}
