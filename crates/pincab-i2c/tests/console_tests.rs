//! The diagnostic console's view of the core: ad hoc one-shots, the
//! address scan, the bus registry and configuration parsing.

use std::cell::RefCell;
use std::rc::Rc;

use embassy_time::Instant;
use pincab_i2c::{
    AdHocStatus, BusConfig, BusRegistry, BusScanner, CmdWord, ConfigError,
    EnableMode, EngineFactory, EngineFault, EngineStatus, I2cBus, PinClaimError,
    PinOwner, PinRole, RecoveryOutcome, TransferEngine, TransferError,
};

fn at(us: u64) -> Instant {
    Instant::from_micros(us)
}

// ---------------------------------------------------------------------------
// Address-scripted engine: ACKs a fixed set of addresses, NAKs the rest
// ---------------------------------------------------------------------------

struct ScriptState {
    ok: Vec<u8>,
    rx: Vec<u8>,
    status: EngineStatus,
}

struct ScriptEngine {
    st: Rc<RefCell<ScriptState>>,
}

impl TransferEngine for ScriptEngine {
    fn start(&mut self, addr: u8, _words: &[CmdWord], _read_len: usize) -> Result<(), EngineFault> {
        let mut s = self.st.borrow_mut();
        s.status = if s.ok.contains(&addr) { EngineStatus::Stop } else { EngineStatus::Abort };
        Ok(())
    }

    fn poll(&mut self) -> EngineStatus {
        self.st.borrow().status
    }

    fn cancel(&mut self) {
        self.st.borrow_mut().status = EngineStatus::Idle;
    }

    fn take_rx(&mut self, out: &mut [u8]) -> usize {
        let s = self.st.borrow();
        let n = s.rx.len().min(out.len());
        out[..n].copy_from_slice(&s.rx[..n]);
        n
    }

    fn bus_clear(&mut self, _freq_hz: u32) -> RecoveryOutcome {
        RecoveryOutcome::Cleared
    }
}

struct ScriptResources {
    st: Rc<RefCell<ScriptState>>,
}

struct ScriptFactory;

impl EngineFactory for ScriptFactory {
    type Engine = ScriptEngine;
    type Resources = ScriptResources;
    type Error = core::convert::Infallible;

    fn create(
        resources: Self::Resources,
    ) -> Result<Self::Engine, (Self::Error, Self::Resources)> {
        Ok(ScriptEngine { st: resources.st })
    }
}

struct OpenPins;

impl PinOwner for OpenPins {
    fn claim(&mut self, _pin: u8, _role: PinRole) -> Result<(), PinClaimError> {
        Ok(())
    }
}

fn config(bus: u8, sda: u8, scl: u8) -> BusConfig {
    BusConfig {
        bus,
        sda,
        scl,
        speed_hz: 400_000,
        pull_ups: true,
        mode: EnableMode::Always,
    }
}

fn make_bus(ok: &[u8], rx: &[u8]) -> I2cBus<'static, ScriptFactory> {
    let st = Rc::new(RefCell::new(ScriptState {
        ok: ok.to_vec(),
        rx: rx.to_vec(),
        status: EngineStatus::Idle,
    }));
    let mut bus =
        I2cBus::new(config(0, 2, 3), ScriptResources { st }, &mut OpenPins)
            .unwrap();
    bus.tick(at(0)); // bring-up
    assert!(bus.is_active());
    bus
}

// ---------------------------------------------------------------------------
// Ad hoc one-shots
// ---------------------------------------------------------------------------

#[test]
fn adhoc_write_read_roundtrip() {
    let mut bus = make_bus(&[0x68], &[5, 6, 7]);

    bus.submit_adhoc(0x68, &[0x00], 3).unwrap();
    // The slot is single-entry until the result is collected.
    assert_eq!(
        bus.submit_adhoc(0x68, &[0x01], 0).unwrap_err(),
        TransferError::Busy
    );
    assert!(bus.take_adhoc_result().is_none());

    bus.tick(at(100)); // launch
    bus.tick(at(200)); // completion

    let res = bus.take_adhoc_result().unwrap();
    assert_eq!(res.status, AdHocStatus::Ok);
    assert_eq!(res.data.as_slice(), &[5, 6, 7]);

    // Collected: the slot is free again.
    bus.submit_adhoc(0x68, &[0x01], 0).unwrap();
}

#[test]
fn adhoc_to_missing_target_reports_nak() {
    let mut bus = make_bus(&[0x68], &[]);

    bus.submit_adhoc(0x30, &[0xAA], 0).unwrap();
    bus.tick(at(100));
    bus.tick(at(200));

    let res = bus.take_adhoc_result().unwrap();
    assert_eq!(res.status, AdHocStatus::Nak);
    assert!(res.data.is_empty());
}

#[test]
fn adhoc_validates_payload() {
    let mut bus = make_bus(&[0x68], &[]);
    assert_eq!(
        bus.submit_adhoc(0x68, &[], 0).unwrap_err(),
        TransferError::Empty
    );
    assert_eq!(
        bus.submit_adhoc(0x68, &[0u8; 32], 0).unwrap_err(),
        TransferError::TooLong
    );
}

// ---------------------------------------------------------------------------
// Bus scan
// ---------------------------------------------------------------------------

#[test]
fn scan_sweeps_all_valid_addresses() {
    let mut bus = make_bus(&[0x23, 0x68], &[0xFF]);
    let mut scanner = BusScanner::new();

    let mut t = 100;
    let report = loop {
        if let Some(report) = scanner.step(&mut bus) {
            break report;
        }
        bus.tick(at(t));
        t += 100;
        assert!(t < 200_000, "scan failed to converge");
    };

    assert!(scanner.is_done());
    assert_eq!(report.count(), 2);
    assert!(report.contains(0x23));
    assert!(report.contains(0x68));
    assert!(!report.contains(0x24));
    let found: Vec<u8> = report.iter().collect();
    assert_eq!(found, vec![0x23, 0x68]);
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn registry_bus(num: u8) -> I2cBus<'static, ScriptFactory> {
    let st = Rc::new(RefCell::new(ScriptState {
        ok: Vec::new(),
        rx: Vec::new(),
        status: EngineStatus::Idle,
    }));
    I2cBus::new(config(num, 2, 3), ScriptResources { st }, &mut OpenPins).unwrap()
}

#[test]
fn registry_owns_one_bus_per_number() {
    let mut registry: BusRegistry<'static, ScriptFactory, 2> = BusRegistry::new();
    registry.add(registry_bus(0)).unwrap();
    registry.add(registry_bus(1)).unwrap();

    assert_eq!(
        registry.add(registry_bus(1)).unwrap_err(),
        ConfigError::DuplicateBus(1)
    );

    assert_eq!(registry.len(), 2);
    assert!(registry.get(0).is_some());
    assert!(registry.get(2).is_none());

    registry.tick_all(at(0));
    assert!(registry.iter().all(|b| b.is_active()));
    assert_eq!(registry.get_mut(1).unwrap().bus_number(), 1);
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[test]
fn config_json_fills_defaults() {
    let cfg: BusConfig =
        serde_json::from_str(r#"{ "bus": 1, "sda": 6, "scl": 7, "mode": "on-demand" }"#)
            .unwrap();
    assert_eq!(cfg.bus, 1);
    assert_eq!(cfg.speed_hz, 400_000);
    assert!(cfg.pull_ups);
    assert_eq!(cfg.mode, EnableMode::OnDemand);
    assert!(cfg.validate().is_ok());
}

#[test]
fn config_json_full_form() {
    let cfg: BusConfig = serde_json::from_str(
        r#"{
            "bus": 0,
            "sda": 20,
            "scl": 21,
            "speed_hz": 100000,
            "pull_ups": false,
            "mode": "disabled"
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.speed_hz, 100_000);
    assert!(!cfg.pull_ups);
    assert_eq!(cfg.mode, EnableMode::Disabled);
}
