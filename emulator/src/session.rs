use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant as HostInstant};

use dispenser_core::flow::SensorLine;
use dispenser_core::hal::{Delay, LedOutput, LevelSensor, MotorDrive, NvStorage, SerialPort};
use dispenser_core::protocol::{FRAME_LEN, FramedLink, Packet};
use dispenser_core::reset::Edge;
use dispenser_core::telemetry::{TelemetryRecord, TelemetrySink};
use dispenser_core::{Board, Node, NodeConfig, NodeState, Peripherals, SharedState};
use rgb::RGB8;

use crate::script::{self, COMMAND_HELP, Directive, HELP_TOPICS};

/// Flow edges produced per millisecond at full speed is `speed / FLOW_DIVISOR`.
const FLOW_DIVISOR: u32 = 64;
const HEALTHY_CURRENT: u16 = 180;
const STALLED_CURRENT: u16 = 900;
/// Main-loop passes given to each node per simulated millisecond.
const STEPS_PER_MS: usize = 4;
const RESET_PULSE_MS: u32 = 3;

/// Simulated hardware behind one node.
#[derive(Default)]
pub struct Pump {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    speed: u8,
    sampling: bool,
    jammed: bool,
    color: RGB8,
    node_id: u8,
    tick_total: u32,
    level: u16,
    flow_credit: u32,
    next_line: usize,
    line_levels: [bool; 4],
}

type PumpHandle = Rc<RefCell<Pump>>;

pub struct PumpSerial(PumpHandle);

impl SerialPort for PumpSerial {
    fn read_byte(&mut self) -> Option<u8> {
        self.0.borrow_mut().rx.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.0.borrow_mut().tx.push(byte);
    }

    fn try_write_byte(&mut self, byte: u8) -> bool {
        self.write_byte(byte);
        true
    }
}

pub struct PumpMotor(PumpHandle);

impl MotorDrive for PumpMotor {
    fn set_speed(&mut self, speed: u8) {
        self.0.borrow_mut().speed = speed;
    }

    fn start_current_sample(&mut self) {
        self.0.borrow_mut().sampling = true;
    }

    fn stop_current_sense(&mut self) {
        self.0.borrow_mut().sampling = false;
    }
}

pub struct PumpLed(PumpHandle);

impl LedOutput for PumpLed {
    fn set_color(&mut self, color: RGB8) {
        self.0.borrow_mut().color = color;
    }
}

pub struct PumpStorage(PumpHandle);

impl NvStorage for PumpStorage {
    type Error = core::convert::Infallible;

    fn read_node_id(&mut self) -> Result<u8, Self::Error> {
        Ok(self.0.borrow().node_id)
    }

    fn read_tick_total(&mut self) -> Result<u32, Self::Error> {
        Ok(self.0.borrow().tick_total)
    }

    fn write_tick_total(&mut self, total: u32) -> Result<(), Self::Error> {
        self.0.borrow_mut().tick_total = total;
        Ok(())
    }
}

pub struct PumpLevel(PumpHandle);

impl LevelSensor for PumpLevel {
    fn read(&mut self) -> u16 {
        self.0.borrow().level
    }
}

/// Blocking delays advance this node's hardware model and time base.
pub struct PumpDelay<'a> {
    pump: PumpHandle,
    shared: &'a SharedState,
}

impl Delay for PumpDelay<'_> {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            advance_hardware(&self.pump, self.shared);
        }
    }
}

/// Prints every telemetry record on stdout.
pub struct StdoutSink {
    slot: usize,
}

impl TelemetrySink for StdoutSink {
    fn emit(&mut self, record: &TelemetryRecord) {
        println!(
            "telemetry:{} slot={} id={} t={}ms {}",
            record.event, self.slot, record.id, record.timestamp, record.details
        );
    }
}

pub struct SimBoard<'a>(core::marker::PhantomData<&'a ()>);

impl<'a> Board for SimBoard<'a> {
    type Link = FramedLink<PumpSerial>;
    type Motor = PumpMotor;
    type Led = PumpLed;
    type Storage = PumpStorage;
    type Level = PumpLevel;
    type Delay = PumpDelay<'a>;
    type Telemetry = StdoutSink;
}

/// One millisecond of hardware activity: flow edges, a pending current
/// conversion, then the time-base tick.
fn advance_hardware(pump: &PumpHandle, shared: &SharedState) {
    let (edges, sample) = {
        let mut guard = pump.borrow_mut();
        let state = &mut *guard;
        state.flow_credit += u32::from(state.speed);
        let edges = state.flow_credit / FLOW_DIVISOR;
        state.flow_credit %= FLOW_DIVISOR;
        let sample = state.sampling.then_some(if state.jammed {
            STALLED_CURRENT
        } else {
            HEALTHY_CURRENT
        });
        state.sampling = false;
        (edges, sample)
    };

    for _ in 0..edges {
        let (line, level) = {
            let mut state = pump.borrow_mut();
            let index = state.next_line;
            state.next_line = (index + 1) % SensorLine::ALL.len();
            state.line_levels[index] = !state.line_levels[index];
            (index, state.line_levels[index])
        };
        if let Some(line) = SensorLine::from_index(line) {
            shared.on_sensor_edge(line, level, &mut PumpMotor(Rc::clone(pump)));
        }
    }

    if let Some(reading) = sample {
        shared.on_current_sample(reading, &mut PumpMotor(Rc::clone(pump)));
    }

    shared.on_time_tick();
}

struct Slot<'a> {
    pump: PumpHandle,
    node: Node<'a, SimBoard<'a>>,
}

/// Bus coordinator plus every simulated node.
pub struct Session<'a> {
    slots: Vec<Slot<'a>>,
    shared: &'a [SharedState],
    sync_level: bool,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl<'a> Session<'a> {
    /// `shared` holds one control state per node id, in the same order.
    pub fn new(shared: &'a [SharedState], ids: &[u8], transcript: Option<&Path>) -> io::Result<Self> {
        let config = NodeConfig::default();
        let mut slots = Vec::with_capacity(ids.len());
        for (slot, (&id, state)) in ids.iter().zip(shared).enumerate() {
            let pump = Rc::new(RefCell::new(Pump {
                node_id: id,
                level: 512,
                ..Pump::default()
            }));
            let mut node = Node::new(
                state,
                &config,
                Peripherals {
                    link: FramedLink::new(PumpSerial(Rc::clone(&pump)), config.frame_gap),
                    motor: PumpMotor(Rc::clone(&pump)),
                    led: PumpLed(Rc::clone(&pump)),
                    storage: PumpStorage(Rc::clone(&pump)),
                    level: PumpLevel(Rc::clone(&pump)),
                    delay: PumpDelay {
                        pump: Rc::clone(&pump),
                        shared: state,
                    },
                    telemetry: StdoutSink { slot },
                },
            );
            node.boot();
            node.step();
            slots.push(Slot { pump, node });
        }

        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        Ok(Self {
            slots,
            shared,
            sync_level: false,
            transcript,
            started_at: HostInstant::now(),
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = &mut self.transcript {
            transcript.append_line(elapsed, "host", line)?;
        }

        let lines = match script::parse(line) {
            Ok(directive) => self.apply(directive),
            Err(err) => vec![format!("ERR syntax {err}")],
        };

        if let Some(transcript) = &mut self.transcript {
            for output in &lines {
                transcript.append_line(elapsed, "emu", output)?;
            }
        }
        Ok(lines)
    }

    fn apply(&mut self, directive: Directive) -> Vec<String> {
        match directive {
            Directive::Help => {
                let mut lines: Vec<String> = HELP_TOPICS.iter().map(|(_, text)| (*text).to_string()).collect();
                lines.push(COMMAND_HELP.to_string());
                lines
            }
            Directive::Reset => {
                for shared in self.shared {
                    shared.on_reset_edge(Edge::Falling);
                }
                self.advance(RESET_PULSE_MS);
                for shared in self.shared {
                    shared.on_reset_edge(Edge::Rising);
                }
                self.settle();
                self.status()
            }
            Directive::Poll => {
                self.broadcast(&[b'?']);
                self.collect_replies()
            }
            Directive::Assign => {
                self.broadcast(&[0xFF]);
                self.settle();
                self.status()
            }
            Directive::Send { dest, command } => {
                self.broadcast(&command.to_packet(dest).encode());
                self.collect_replies()
            }
            Directive::Run { ms } => {
                self.advance(ms);
                self.status()
            }
            Directive::Sync { edges } => {
                for _ in 0..edges {
                    self.sync_level = !self.sync_level;
                    for shared in self.shared {
                        shared.on_sync_edge(self.sync_level);
                    }
                    self.settle();
                }
                self.status()
            }
            Directive::Jam { slot, jammed } => match self.slots.get(slot) {
                Some(target) => {
                    target.pump.borrow_mut().jammed = jammed;
                    vec![format!("slot {slot} jammed={jammed}")]
                }
                None => vec![format!("ERR no slot {slot}")],
            },
            Directive::Level { slot, reading } => match self.slots.get(slot) {
                Some(target) => {
                    target.pump.borrow_mut().level = reading;
                    vec![format!("slot {slot} level probe={reading}")]
                }
                None => vec![format!("ERR no slot {slot}")],
            },
            Directive::Status => self.status(),
        }
    }

    fn broadcast(&mut self, bytes: &[u8]) {
        for slot in &self.slots {
            slot.pump.borrow_mut().rx.extend(bytes.iter().copied());
        }
    }

    /// Runs every node's main loop until it has drained its receive queue.
    fn settle(&mut self) {
        for slot in &mut self.slots {
            for _ in 0..=FRAME_LEN {
                slot.node.step();
                if slot.pump.borrow().rx.is_empty() {
                    break;
                }
            }
            slot.node.step();
        }
    }

    fn advance(&mut self, ms: u32) {
        for _ in 0..ms {
            for (slot, shared) in self.slots.iter_mut().zip(self.shared) {
                advance_hardware(&slot.pump, shared);
                for _ in 0..STEPS_PER_MS {
                    slot.node.step();
                }
            }
        }
    }

    fn collect_replies(&mut self) -> Vec<String> {
        self.settle();
        let mut lines = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let tx = std::mem::take(&mut slot.pump.borrow_mut().tx);
            if tx.is_empty() {
                continue;
            }
            if matches!(slot.node.state(), NodeState::Online(_)) && tx.len() % FRAME_LEN == 0 {
                for chunk in tx.chunks_exact(FRAME_LEN) {
                    lines.push(format!("slot {index} <- {}", describe_frame(chunk)));
                }
            } else {
                lines.push(format!("slot {index} <- {}", hex(&tx)));
            }
        }
        if lines.is_empty() {
            lines.push("no reply".to_string());
        }
        lines
    }

    fn status(&self) -> Vec<String> {
        self.slots
            .iter()
            .zip(self.shared)
            .enumerate()
            .map(|(index, (slot, shared))| {
                let pump = slot.pump.borrow();
                format!(
                    "slot {index}: id={} state={:?} speed={} ticks={} stored={} fault={} led={:?} rgb=({},{},{})",
                    pump.node_id,
                    slot.node.state(),
                    pump.speed,
                    shared.ticks(),
                    pump.tick_total,
                    shared.fault_latched(),
                    shared.led_pattern(),
                    pump.color.r,
                    pump.color.g,
                    pump.color.b,
                )
            })
            .collect()
    }
}

fn describe_frame(chunk: &[u8]) -> String {
    let Ok(frame) = <[u8; FRAME_LEN]>::try_from(chunk) else {
        return hex(chunk);
    };
    match Packet::decode(&frame) {
        Ok(packet) => match packet.packet_type() {
            Some(kind) => format!("{kind:?} dest={} value={}", packet.dest, packet.u32_arg()),
            None => format!("type={} dest={} value={}", packet.kind, packet.dest, packet.u32_arg()),
        },
        Err(err) => format!("{err} [{}]", hex(chunk)),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# dispenser bus emulator transcript")?;
        Ok(Self { writer })
    }

    fn append_line(&mut self, elapsed: Duration, role: &str, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[{:>8.3}s] {role:<4} {line}",
            elapsed.as_secs_f64()
        )?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_session<'a>(shared: &'a [SharedState], ids: &[u8]) -> Session<'a> {
        let mut session = Session::new(shared, ids, None).expect("session starts");
        session.handle_command("poll").expect("poll");
        session.handle_command("assign").expect("assign");
        session
    }

    #[test]
    fn poll_collects_every_node_id() {
        let shared = [SharedState::new(), SharedState::new()];
        let mut session = Session::new(&shared, &[7, 3], None).expect("session starts");

        let lines = session.handle_command("poll").expect("poll");

        assert_eq!(lines, vec!["slot 0 <- 07".to_string(), "slot 1 <- 03".to_string()]);
    }

    #[test]
    fn unicast_dispense_only_moves_the_addressed_pump() {
        let shared = [SharedState::new(), SharedState::new()];
        let mut session = online_session(&shared, &[7, 3]);

        session.handle_command("send 7 ticks 100").expect("send");
        session.handle_command("run 5").expect("run");

        assert!(shared[0].is_dispensing());
        assert!(shared[0].ticks() > 0);
        assert_eq!(shared[1].ticks(), 0);

        session.handle_command("run 100").expect("run");
        assert!(!shared[0].is_dispensing());
    }

    #[test]
    fn jammed_pump_trips_and_recovers_after_reset() {
        let shared = [SharedState::new()];
        let mut session = online_session(&shared, &[4]);

        session.handle_command("jam 0").expect("jam");
        session.handle_command("send 4 ticks 5000").expect("send");
        session.handle_command("run 10").expect("run");
        assert!(shared[0].fault_latched());

        session.handle_command("reset").expect("reset");
        assert!(!shared[0].fault_latched());
    }

    #[test]
    fn syntax_errors_are_reported() {
        let shared = [SharedState::new()];
        let mut session = Session::new(&shared, &[1], None).expect("session starts");

        let lines = session.handle_command("send 1 launch").expect("handled");

        assert!(lines[0].starts_with("ERR syntax"));
    }
}
