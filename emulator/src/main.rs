mod script;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use dispenser_core::SharedState;
use session::Session;

const DEFAULT_IDS: &[u8] = &[1, 2, 3];

struct Options {
    ids: Vec<u8>,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: dispenser-emulator [--transcript <path>] [node-id ...]");
        process::exit(2);
    });

    let shared: Vec<SharedState> = options.ids.iter().map(|_| SharedState::new()).collect();
    let mut session = Session::new(&shared, &options.ids, options.transcript.as_deref())?;

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut line = String::new();

    writeln!(
        stdout.lock(),
        "Dispenser bus emulator ready with {} node(s). Type `help` for directives or `exit` to quit.",
        options.ids.len()
    )?;

    loop {
        line.clear();
        {
            let mut writer = stdout.lock();
            write!(writer, "> ")?;
            writer.flush()?;
        }

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(stdout.lock())?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(stdout.lock(), "Session closed.")?;
            break;
        }

        // Node telemetry is printed while the directive runs, so the
        // directive's own output is written afterwards.
        let responses = session.handle_command(trimmed)?;
        let mut writer = stdout.lock();
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut ids = Vec::new();
    let mut transcript = None;
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--transcript=") {
            transcript = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let value = args
                .next()
                .ok_or_else(|| "Expected path after --transcript".to_string())?;
            transcript = Some(PathBuf::from(value));
        } else {
            let id = arg
                .parse::<u8>()
                .map_err(|_| format!("Invalid node id `{arg}`"))?;
            ids.push(id);
        }
    }

    if ids.is_empty() {
        ids.extend_from_slice(DEFAULT_IDS);
    }
    Ok(Options { ids, transcript })
}
