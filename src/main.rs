use std::{
    env,
    ffi::OsString,
    io::{self, IsTerminal as _, Read, Write},
    process::ExitCode,
    time::Duration,
};

use anyhow::Context as _;
use clap::Parser;
use jr::{encode_request, render, Client, Dialect, Id, Params};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const ENV_JR_LOG: &str = "JR_LOG";

const PARAMETERS_HELP: &str = "\
Parameters are key/value pairs. They come in two forms:

  key=value     (for strings; result is \"key\":\"value\")
  key:=value    (for raw JSON; result is \"key\":value)

A single parameter without '=' is sent on its own: as a string, or as raw
JSON if it starts with ':'. With no parameters, piped stdin is sent as raw JSON.";

/// Make a single JSON-RPC call over TCP and print the reply.
#[derive(Parser, Debug)]
#[command(name = "jr", version, after_help = PARAMETERS_HELP)]
struct Args {
    /// Do not format JSON output; print the reply exactly as received.
    ///
    /// `-no-format` is accepted too.
    #[arg(long = "no-format", env = "JR_NO_FORMAT")]
    no_format: bool,
    /// The envelope to send and expect back.
    #[arg(long, value_enum, default_value_t, env = "JR_DIALECT")]
    dialect: Dialect,
    /// The `id` member of the request, as JSON: a string, a number or null.
    #[arg(long, default_value = "0", env = "JR_ID")]
    id: Id,
    /// Give up on connecting, and on the reply, after this many seconds.
    #[arg(long, value_parser = parse_seconds, env = "JR_TIMEOUT")]
    timeout: Option<Duration>,
    /// Print the request line instead of sending it.
    #[arg(long)]
    dry_run: bool,
    /// The server's TCP endpoint.
    #[arg(value_name = "ADDRESS:PORT")]
    address: String,
    /// The method to call, passed through verbatim.
    method: String,
    /// `key=value` or `key:=value` pairs, or one bare value.
    #[arg(value_name = "PARAMETER", trailing_var_arg = true, allow_hyphen_values = true)]
    params: Vec<String>,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs = s.parse::<f64>().map_err(|e| e.to_string())?;
    match Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())? {
        it if it.is_zero() => Err("timeout must be greater than zero".to_owned()),
        it => Ok(it),
    }
}

/// Accept the single-dash `-no-format` spelling.
fn normalize_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut options_ended = false;
    args.into_iter()
        .map(|arg| {
            if arg == "--" {
                options_ended = true;
            }
            match !options_ended && arg == "-no-format" {
                true => OsString::from("--no-format"),
                false => arg,
            }
        })
        .collect()
}

/// Whether data is being piped in, rather than stdin being a terminal or other device.
fn stdin_is_piped() -> bool {
    #[cfg(unix)]
    {
        use std::os::{fd::AsFd as _, unix::fs::FileTypeExt as _};
        if let Ok(meta) = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map(std::fs::File::from)
            .and_then(|it| it.metadata())
        {
            return !meta.file_type().is_char_device();
        }
    }
    !io::stdin().is_terminal()
}

fn main() -> ExitCode {
    let args = Args::parse_from(normalize_flags(env::args_os()));
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(ENV_JR_LOG).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
    debug!(?args);

    match run(args, stdin_is_piped, io::stdin().lock(), io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `stdin` is only read when no parameters were given and `stdin_is_piped` says so.
fn run(
    args: Args,
    stdin_is_piped: impl FnOnce() -> bool,
    stdin: impl Read,
    mut stdout: impl Write,
) -> anyhow::Result<()> {
    let Args {
        no_format,
        dialect,
        id,
        timeout,
        dry_run,
        address,
        method,
        params,
    } = args;

    let stdin = (params.is_empty() && stdin_is_piped()).then_some(stdin);
    let params = Params::build(&params, stdin)?;
    debug!(?params);
    let payload = params.to_json();
    let encode = || {
        encode_request(dialect, &method, payload.as_deref(), &id).context("Call failed")
    };

    if dry_run {
        writeln!(stdout, "{}", encode()?)?;
        return Ok(());
    }

    let mut client = Client::connect(&address, timeout).context("Couldn't connect to server")?;
    let request = encode()?;
    let reply = client
        .call(&request, &id, dialect)
        .context("Call failed")?;
    drop(client);

    match no_format {
        true => writeln!(stdout, "{}", reply.get())?,
        false => writeln!(stdout, "{}", render::indent(reply.get(), "\t"))?,
    }
    Ok(())
}
