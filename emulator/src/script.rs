//! Line grammar for the bus emulator.
//!
//! Each input line is one directive. Directives either act as the bus
//! coordinator (`poll`, `assign`, `send ...`), drive the shared bus lines
//! (`reset`, `sync`), or poke the simulated pump hardware (`jam`, `level`).

use dispenser_core::protocol::{Command, DEST_BROADCAST};
use winnow::ascii::{Caseless, dec_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::error::{ContextError, StrContext, StrContextValue};
use winnow::prelude::*;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("reset", "reset                         - pulse the shared reset line"),
    ("poll", "poll                          - send the address poll byte"),
    ("assign", "assign                        - send the negotiation terminator"),
    ("send", "send <id|all> <command> [arg] - send a framed command packet"),
    ("run", "run <ms>                      - advance simulated time"),
    ("sync", "sync <edges>                  - toggle the LED sync line"),
    ("jam", "jam <slot> [on|off]           - stall the pump in a slot"),
    ("level", "level <slot> <reading>        - set the level probe reading"),
    ("status", "status                        - show every node"),
    ("help", "help                          - list directives"),
];

pub const COMMAND_HELP: &str = "commands: ping | speed <0-255> | ticks <n> | timed <ms> | dispensing? | \
level? | refresh-level | led <off|idle|dispense|done|clean> | comm-test | conflict | \
threshold <n> | saved-ticks? | reset-saved-ticks";

/// One parsed input line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Directive {
    Help,
    Reset,
    Poll,
    Assign,
    Status,
    Send { dest: u8, command: Command },
    Run { ms: u32 },
    Sync { edges: u32 },
    Jam { slot: usize, jammed: bool },
    Level { slot: usize, reading: u16 },
}

/// Rejected input line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptError {
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at column {}: {}", self.offset + 1, self.message)
    }
}

impl std::error::Error for ScriptError {}

pub fn parse(line: &str) -> Result<Directive, ScriptError> {
    terminated(directive, (space0, eof))
        .parse(line.trim())
        .map_err(|err| ScriptError {
            offset: err.offset(),
            message: describe(err.inner()),
        })
}

fn describe(err: &ContextError) -> String {
    let rendered = err.to_string();
    if rendered.is_empty() {
        "unrecognised input".to_string()
    } else {
        rendered
    }
}

fn directive(input: &mut &str) -> ModalResult<Directive> {
    alt((
        Caseless("help").value(Directive::Help),
        Caseless("reset").value(Directive::Reset),
        Caseless("poll").value(Directive::Poll),
        Caseless("assign").value(Directive::Assign),
        Caseless("status").value(Directive::Status),
        preceded((Caseless("run"), space1), dec_uint).map(|ms| Directive::Run { ms }),
        preceded((Caseless("sync"), space1), dec_uint).map(|edges| Directive::Sync { edges }),
        preceded(
            (Caseless("jam"), space1),
            (dec_uint, opt(preceded(space1, on_off))),
        )
        .map(|(slot, jammed): (usize, Option<bool>)| Directive::Jam {
            slot,
            jammed: jammed.unwrap_or(true),
        }),
        preceded(
            (Caseless("level"), space1),
            (dec_uint, preceded(space1, dec_uint)),
        )
        .map(|(slot, reading)| Directive::Level { slot, reading }),
        preceded(
            (Caseless("send"), space1),
            (destination, preceded(space1, command)),
        )
        .map(|(dest, command)| Directive::Send { dest, command }),
    ))
    .context(StrContext::Label("directive"))
    .context(StrContext::Expected(StrContextValue::Description(
        "reset, poll, assign, send, run, sync, jam, level, status or help",
    )))
    .parse_next(input)
}

fn destination(input: &mut &str) -> ModalResult<u8> {
    alt((Caseless("all").value(DEST_BROADCAST), dec_uint))
        .context(StrContext::Label("destination"))
        .parse_next(input)
}

fn on_off(input: &mut &str) -> ModalResult<bool> {
    alt((Caseless("on").value(true), Caseless("off").value(false))).parse_next(input)
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((
        Caseless("ping").value(Command::Ping),
        preceded((Caseless("speed"), space1), dec_uint).map(Command::SetMotorSpeed),
        preceded((Caseless("ticks"), space1), dec_uint).map(Command::DispenseTicks),
        preceded((Caseless("timed"), space1), dec_uint).map(Command::DispenseTimed),
        Caseless("dispensing?").value(Command::QueryIsDispensing),
        Caseless("refresh-level").value(Command::RefreshLiquidLevel),
        Caseless("level?").value(Command::QueryLiquidLevel),
        preceded((Caseless("led"), space1), led_command),
        Caseless("comm-test").value(Command::CommTest),
        Caseless("conflict").value(Command::IdConflict),
        preceded((Caseless("threshold"), space1), dec_uint).map(Command::SetCurrentThreshold),
        Caseless("reset-saved-ticks").value(Command::ResetSavedTicks),
        Caseless("saved-ticks?").value(Command::QuerySavedTicks),
    ))
    .context(StrContext::Label("command"))
    .parse_next(input)
}

fn led_command(input: &mut &str) -> ModalResult<Command> {
    alt((
        Caseless("off").value(Command::LedOff),
        Caseless("idle").value(Command::LedIdle),
        Caseless("dispense").value(Command::LedDispense),
        Caseless("done").value(Command::LedDrinkDone),
        Caseless("clean").value(Command::LedClean),
    ))
    .context(StrContext::Label("led pattern"))
    .parse_next(input)
}
