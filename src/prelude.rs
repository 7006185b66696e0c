//! Prelude (helpful reexports) for this package

pub use crate::{
    board::{BoardConfig, ChannelState, VectorMapping, Vsdc4},
    channel::Channel,
    clock::{Clock, ManualClock, SystemClock},
    coordination::{run_scenario, ArmStep, ScenarioConfig, ScenarioReport},
    device::{Device, DeviceConfig},
    measurement::{Acquisition, Completion, MeasurementResult, Waveform},
    sink::{CsvSink, MemorySink, SampleSink},
    transport::{mock::MockVme, Driver, RegisterWord},
};
pub use caenvme::{BoardType, IrqLevel};
