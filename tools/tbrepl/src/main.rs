use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use miette::{miette, Context, IntoDiagnostic, LabeledSpan};
use serde::Deserialize;
use tbforth::{AbortReason, Boot, Error, Forth, Image, Mode, Params};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Targets, prelude::*};

mod host;

use crate::host::StdHost;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// a dictionary image to start from. `save-image` writes back to it.
    ///
    /// if the file is missing, or was written by an incompatible build, the
    /// VM starts from a fresh dictionary.
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// forth source files to interpret, in order, before reading stdin.
    #[arg(short = 'f', long = "include")]
    include: Vec<PathBuf>,

    /// a TOML file with VM sizing parameters.
    #[arg(short, long, env = "TBFORTH_CONFIG")]
    config: Option<PathBuf>,

    /// print every word in the dictionary, newest first, and exit.
    #[arg(long)]
    words: bool,

    /// a comma-separated list of `tracing` targets and levels to enable.
    ///
    /// for example, `warn,tbforth=debug` enables the `WARN` level globally
    /// and the `DEBUG` level for the forth VM.
    #[arg(
        long = "trace",
        env = "TBFORTH_TRACE",
        default_value_t = Targets::new().with_default(LevelFilter::WARN),
    )]
    trace_filter: Targets,
}

/// The contents of a `--config` file.
#[derive(Debug, Default, Deserialize)]
struct Config {
    /// used when `--image` isn't given.
    image: Option<PathBuf>,
    #[serde(default)]
    params: Params,
}

fn main() -> miette::Result<()> {
    let Args {
        image,
        include,
        config,
        words,
        trace_filter,
    } = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(io::stderr),
        )
        .with(trace_filter)
        .init();

    let config = match config {
        Some(path) => load_config(&path)?,
        None => Config::default(),
    };
    let image_path = image.or(config.image);
    let image = image_path.as_deref().and_then(load_image);

    let (mut forth, boot) = Forth::boot(config.params, StdHost::new(image_path), image)
        .map_err(|err| miette!("failed to start the forth VM: {err:?}"))?;
    if boot == Boot::Fresh {
        tracing::debug!("started from a fresh dictionary");
    }

    if words {
        for name in forth.words() {
            println!("{}", String::from_utf8_lossy(&name));
        }
        return Ok(());
    }

    let abort = forth.abort_handle();
    {
        let abort = abort.clone();
        ctrlc::set_handler(move || abort.request(AbortReason::CtrlC))
            .into_diagnostic()
            .context("failed to set Ctrl-C handler")?;
    }

    for path in &include {
        let source = fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("failed to read {}", path.display()))?;
        for line in source.lines() {
            abort.clear();
            if let Err(err) = forth.interpret(line) {
                report(&forth, line, &err);
            }
        }
        let _ = forth.host.flush();
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.lock().read_line(&mut line).into_diagnostic()? == 0 {
            break;
        }
        abort.clear();
        let line = line.trim_end_matches(['\r', '\n']);
        let res = forth.interpret(line);
        let _ = forth.host.flush();
        match res {
            Ok(Mode::Interpret) => println!(" ok"),
            Ok(Mode::Compile) => println!(" compiled"),
            Err(err) => report(&forth, line, &err),
        }
        io::stdout().flush().into_diagnostic()?;
    }

    Ok(())
}

fn load_config(path: &Path) -> miette::Result<Config> {
    let text = fs::read_to_string(path)
        .into_diagnostic()
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&text)
        .into_diagnostic()
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn load_image(path: &Path) -> Option<Image> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::info!(%error, path = %path.display(), "no image loaded");
            return None;
        }
    };
    match Image::from_bytes(&bytes) {
        Ok(image) => Some(image),
        Err(err) => {
            tracing::warn!(?err, path = %path.display(), "unreadable image");
            None
        }
    }
}

/// Points at the token a line failed on.
fn report(forth: &Forth<StdHost>, line: &str, err: &Error) {
    let tok = forth.token();
    let mut report = miette!("{}", describe(err));
    if tok.len > 0 && tok.text(line).is_some() {
        report = miette!(
            labels = vec![LabeledSpan::at(tok.offset..tok.offset + tok.len, "here")],
            "{}",
            describe(err)
        );
    }
    eprintln!("{:?}", report.with_source_code(line.to_string()));
}

fn describe(err: &Error) -> String {
    match err {
        Error::NotAWord => "not a word".into(),
        Error::NotANumber => "not a number".into(),
        Error::Abort(AbortReason::CtrlC) => "interrupted".into(),
        Error::Abort(AbortReason::Word) => "aborted".into(),
        Error::InputTooLong(len) => format!("line too long ({len} bytes)"),
        err => format!("{err:?} (status {})", err.status() as i32),
    }
}
