#![allow(dead_code)]

use core::cell::RefCell;
use core::marker::PhantomData;

use dispenser_core::config::FRAME_GAP;
use dispenser_core::flow::SensorLine;
use dispenser_core::hal::{Delay, LedOutput, LevelSensor, MotorDrive, NvStorage, SerialPort};
use dispenser_core::protocol::{FRAME_LEN, FramedLink, Packet};
use dispenser_core::reset::Edge;
use dispenser_core::telemetry::NoopSink;
use dispenser_core::{Board, Node, NodeConfig, NodeState, Peripherals, SharedState};
use heapless::{Deque, Vec as HeaplessVec};
use rgb::RGB8;

/// Observable state behind every mock collaborator of one node.
#[derive(Default)]
pub struct Rig {
    pub rx: Deque<u8, 256>,
    pub tx: HeaplessVec<u8, 256>,
    pub tx_blocked: bool,
    pub speed: u8,
    pub samples_started: u32,
    pub sense_stops: u32,
    pub color: RGB8,
    pub node_id: u8,
    pub tick_total: u32,
    pub tick_writes: u32,
    pub level: u16,
    pub slept_ms: u32,
    pub reset_at_ms: Option<u32>,
    pub hall_level: bool,
}

pub struct RigSerial<'a>(pub &'a RefCell<Rig>);

impl SerialPort for RigSerial<'_> {
    fn read_byte(&mut self) -> Option<u8> {
        self.0.borrow_mut().rx.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.0.borrow_mut().tx.push(byte).expect("tx capacity");
    }

    fn try_write_byte(&mut self, byte: u8) -> bool {
        let mut rig = self.0.borrow_mut();
        !rig.tx_blocked && rig.tx.push(byte).is_ok()
    }
}

pub struct RigMotor<'a>(pub &'a RefCell<Rig>);

impl MotorDrive for RigMotor<'_> {
    fn set_speed(&mut self, speed: u8) {
        self.0.borrow_mut().speed = speed;
    }

    fn start_current_sample(&mut self) {
        self.0.borrow_mut().samples_started += 1;
    }

    fn stop_current_sense(&mut self) {
        self.0.borrow_mut().sense_stops += 1;
    }
}

pub struct RigLed<'a>(pub &'a RefCell<Rig>);

impl LedOutput for RigLed<'_> {
    fn set_color(&mut self, color: RGB8) {
        self.0.borrow_mut().color = color;
    }
}

pub struct RigStorage<'a>(pub &'a RefCell<Rig>);

impl NvStorage for RigStorage<'_> {
    type Error = ();

    fn read_node_id(&mut self) -> Result<u8, ()> {
        Ok(self.0.borrow().node_id)
    }

    fn read_tick_total(&mut self) -> Result<u32, ()> {
        Ok(self.0.borrow().tick_total)
    }

    fn write_tick_total(&mut self, total: u32) -> Result<(), ()> {
        let mut rig = self.0.borrow_mut();
        rig.tick_total = total;
        rig.tick_writes += 1;
        Ok(())
    }
}

pub struct RigLevel<'a>(pub &'a RefCell<Rig>);

impl LevelSensor for RigLevel<'_> {
    fn read(&mut self) -> u16 {
        self.0.borrow().level
    }
}

/// Advances the shared time base and fires a scripted bus reset.
pub struct RigDelay<'a> {
    rig: &'a RefCell<Rig>,
    shared: &'a SharedState,
}

impl Delay for RigDelay<'_> {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms {
            self.shared.on_time_tick();
            let fire = {
                let mut rig = self.rig.borrow_mut();
                rig.slept_ms += 1;
                rig.reset_at_ms == Some(rig.slept_ms)
            };
            if fire {
                pulse_reset(self.shared);
            }
        }
    }
}

pub struct TestBoard<'a>(PhantomData<&'a ()>);

impl<'a> Board for TestBoard<'a> {
    type Link = FramedLink<RigSerial<'a>>;
    type Motor = RigMotor<'a>;
    type Led = RigLed<'a>;
    type Storage = RigStorage<'a>;
    type Level = RigLevel<'a>;
    type Delay = RigDelay<'a>;
    type Telemetry = NoopSink;
}

pub type TestNode<'a> = Node<'a, TestBoard<'a>>;

/// Drives a full falling/rising reset pulse longer than the debounce width.
pub fn pulse_reset(shared: &SharedState) {
    shared.on_reset_edge(Edge::Falling);
    shared.on_time_tick();
    shared.on_time_tick();
    shared.on_reset_edge(Edge::Rising);
}

pub struct Fixture {
    pub shared: SharedState,
    pub rig: RefCell<Rig>,
    config: NodeConfig,
}

impl Fixture {
    pub fn new(node_id: u8) -> Self {
        Self::with_config(node_id, NodeConfig::new())
    }

    pub fn with_config(node_id: u8, config: NodeConfig) -> Self {
        Self {
            shared: SharedState::with_config(&config),
            rig: RefCell::new(Rig {
                node_id,
                ..Rig::default()
            }),
            config,
        }
    }

    pub fn node(&self) -> TestNode<'_> {
        Node::new(
            &self.shared,
            &self.config,
            Peripherals {
                link: FramedLink::new(RigSerial(&self.rig), FRAME_GAP),
                motor: RigMotor(&self.rig),
                led: RigLed(&self.rig),
                storage: RigStorage(&self.rig),
                level: RigLevel(&self.rig),
                delay: RigDelay {
                    rig: &self.rig,
                    shared: &self.shared,
                },
                telemetry: NoopSink,
            },
        )
    }

    /// Steps `node` through negotiation until it is online.
    pub fn bring_online(&self, node: &mut TestNode<'_>) -> NodeState {
        assert_eq!(node.step(), NodeState::Negotiating);
        self.feed(&[b'?', 0xFF]);
        let state = node.step();
        self.rig.borrow_mut().tx.clear();
        state
    }

    pub fn feed(&self, bytes: &[u8]) {
        let mut rig = self.rig.borrow_mut();
        for &byte in bytes {
            rig.rx.push_back(byte).expect("rx capacity");
        }
    }

    pub fn send(&self, packet: &Packet) {
        self.feed(&packet.encode());
    }

    /// Delivers `count` level changes on one hall line through the edge handler.
    pub fn pump_edges(&self, count: u32) {
        for _ in 0..count {
            let level = {
                let mut rig = self.rig.borrow_mut();
                rig.hall_level = !rig.hall_level;
                rig.hall_level
            };
            self.shared
                .on_sensor_edge(SensorLine::Hall2, level, &mut RigMotor(&self.rig));
        }
    }

    /// Delivers one current-sense conversion through the sampler handler.
    pub fn sample_current(&self, reading: u16) {
        self.shared.on_current_sample(reading, &mut RigMotor(&self.rig));
    }

    /// Decodes every complete reply frame sent so far and clears the transmit log.
    pub fn replies(&self) -> std::vec::Vec<Packet> {
        let mut rig = self.rig.borrow_mut();
        let replies = rig
            .tx
            .chunks_exact(FRAME_LEN)
            .map(|chunk| {
                let frame: [u8; FRAME_LEN] = chunk.try_into().expect("frame length");
                Packet::decode(&frame).expect("valid reply frame")
            })
            .collect();
        rig.tx.clear();
        replies
    }

    pub fn speed(&self) -> u8 {
        self.rig.borrow().speed
    }

    pub fn color(&self) -> RGB8 {
        self.rig.borrow().color
    }
}

/// Feeds `packet` and steps until the link has consumed it.
pub fn deliver(fixture: &Fixture, node: &mut TestNode<'_>, packet: &Packet) -> NodeState {
    fixture.send(packet);
    node.step()
}
