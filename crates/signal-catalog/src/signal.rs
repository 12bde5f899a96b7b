//! Module Headers and the Signal Table
//!
//! Maps every known signal to the module it lives on, its extended-PID
//! command, the response shape and the formula that turns bytes into a
//! physical value.

use crate::decode::{self, SignalValue};
use crate::error::SignalError;
use obd_protocol::{ObdError, Query, RawFrame};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CAN modules addressed by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    /// Anti-lock brake system
    Abs,
    /// Body control
    BodyControl,
    /// Accessory protocol interface
    AccessoryInterface,
    /// OBD-II standard
    Obdii,
    /// Powertrain control
    Powertrain,
    /// Steering angle sensor
    SteeringAngleSensor,
}

impl Module {
    /// Transmit header of the module
    pub fn header(&self) -> u32 {
        match self {
            Module::Abs => 0x760,
            Module::BodyControl => 0x726,
            Module::AccessoryInterface => 0x7D0,
            Module::Obdii | Module::Powertrain => 0x7E0,
            Module::SteeringAngleSensor => 0x797,
        }
    }

    /// CAN id the module answers from
    pub fn response_address(&self) -> u32 {
        self.header() + 8
    }
}

/// Named signals that can be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    AbsAccelerationLat,
    AbsAccelerationLon,
    AbsSteeringAngle,
    AbsTotalDistance,
    AbsVehicleSpeed,
    AbsWheelSpeedFl,
    AbsWheelSpeedFr,
    AbsWheelSpeedRl,
    AbsWheelSpeedRr,
    ApiGps,
    ObdiiRpm,
    ObdiiTotalDistance,
    ObdiiVehicleSpeed,
    PcAcceleratorFraction,
    PcPressureBarometric,
    PcTemperatureAmbient,
    PcTemperatureIntake,
    PcTimeSinceEngineStart,
    PcTotalDistance,
    SasSteeringAngle,
}

/// One row of the signal table
pub struct SignalSpec {
    /// Signal this row describes
    pub signal: Signal,
    /// Snake-case name used in configuration and lookups
    pub name: &'static str,
    /// Module to query
    pub module: Module,
    /// Extended-PID command
    pub command: u32,
    /// Expected byte count of each response frame
    pub frame_lengths: &'static [usize],
    /// Unit of the decoded value
    pub unit: &'static str,
    /// Bytes to physical value
    pub decode: fn(&RawFrame) -> SignalValue,
}

impl SignalSpec {
    /// Adapter query for this signal
    pub fn query(&self) -> Result<Query, ObdError> {
        Query::new(
            self.module.header(),
            self.module.response_address(),
            self.command,
            self.frame_lengths,
        )
    }
}

macro_rules! spec {
    ($signal:ident, $name:literal, $module:ident, $command:literal, $shape:expr, $unit:literal, $decode:path) => {
        SignalSpec {
            signal: Signal::$signal,
            name: $name,
            module: Module::$module,
            command: $command,
            frame_lengths: $shape,
            unit: $unit,
            decode: $decode,
        }
    };
}

/// Rows are in `Signal` declaration order
static TABLE: [SignalSpec; 20] = [
    spec!(AbsAccelerationLat, "abs_acceleration_lat", Abs, 0x222B11, &[5], "g", decode::acceleration),
    spec!(AbsAccelerationLon, "abs_acceleration_lon", Abs, 0x222B0C, &[5], "g", decode::acceleration),
    spec!(AbsSteeringAngle, "abs_steering_angle", Abs, 0x223302, &[5], "deg", decode::abs_steering_angle),
    spec!(AbsTotalDistance, "abs_total_distance", Abs, 0x22DD01, &[6], "km", decode::raw),
    spec!(AbsVehicleSpeed, "abs_vehicle_speed", Abs, 0x22F40D, &[4], "km/h", decode::raw),
    spec!(AbsWheelSpeedFl, "abs_wheel_speed_fl", Abs, 0x222B06, &[4], "km/h", decode::raw),
    spec!(AbsWheelSpeedFr, "abs_wheel_speed_fr", Abs, 0x222B07, &[4], "km/h", decode::raw),
    spec!(AbsWheelSpeedRl, "abs_wheel_speed_rl", Abs, 0x222B08, &[4], "km/h", decode::raw),
    spec!(AbsWheelSpeedRr, "abs_wheel_speed_rr", Abs, 0x222B09, &[4], "km/h", decode::raw),
    spec!(ApiGps, "api_gps", AccessoryInterface, 0x228012, &[6, 7, 7], "deg", decode::gps),
    spec!(ObdiiRpm, "obdii_rpm", Obdii, 0x22F40C, &[5], "rpm", decode::rpm),
    spec!(ObdiiTotalDistance, "obdii_total_distance", Obdii, 0x22DD01, &[6], "km", decode::raw),
    spec!(ObdiiVehicleSpeed, "obdii_vehicle_speed", Obdii, 0x221505, &[5], "km/h", decode::obdii_speed),
    spec!(PcAcceleratorFraction, "pc_accelerator_fraction", Powertrain, 0x22032B, &[4], "", decode::fraction),
    spec!(PcPressureBarometric, "pc_pressure_barometric", Powertrain, 0x22F433, &[4], "kPa", decode::raw),
    spec!(PcTemperatureAmbient, "pc_temperature_ambient", Powertrain, 0x22057D, &[4], "°C", decode::ambient_temperature),
    spec!(PcTemperatureIntake, "pc_temperature_intake", Powertrain, 0x22F40F, &[4], "°C", decode::intake_temperature),
    spec!(PcTimeSinceEngineStart, "pc_time_since_engine_start", Powertrain, 0x221126, &[4], "s", decode::raw),
    spec!(PcTotalDistance, "pc_total_distance", Powertrain, 0x22DD01, &[6], "km", decode::raw),
    spec!(SasSteeringAngle, "sas_steering_angle", SteeringAngleSensor, 0x22203A, &[6, 6, 7], "deg", decode::sas_steering_angle),
];

impl Signal {
    /// Every signal, in table order
    pub const ALL: [Signal; 20] = [
        Signal::AbsAccelerationLat,
        Signal::AbsAccelerationLon,
        Signal::AbsSteeringAngle,
        Signal::AbsTotalDistance,
        Signal::AbsVehicleSpeed,
        Signal::AbsWheelSpeedFl,
        Signal::AbsWheelSpeedFr,
        Signal::AbsWheelSpeedRl,
        Signal::AbsWheelSpeedRr,
        Signal::ApiGps,
        Signal::ObdiiRpm,
        Signal::ObdiiTotalDistance,
        Signal::ObdiiVehicleSpeed,
        Signal::PcAcceleratorFraction,
        Signal::PcPressureBarometric,
        Signal::PcTemperatureAmbient,
        Signal::PcTemperatureIntake,
        Signal::PcTimeSinceEngineStart,
        Signal::PcTotalDistance,
        Signal::SasSteeringAngle,
    ];

    /// Table row for this signal
    pub fn spec(&self) -> &'static SignalSpec {
        &TABLE[*self as usize]
    }

    /// Snake-case name
    pub fn name(&self) -> &'static str {
        self.spec().name
    }

    /// Module the signal is read from
    pub fn module(&self) -> Module {
        self.spec().module
    }

    /// Decode a response already validated against [`SignalSpec::frame_lengths`]
    pub fn decode(&self, frame: &RawFrame) -> SignalValue {
        (self.spec().decode)(frame)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TABLE
            .iter()
            .find(|spec| spec.name == s)
            .map(|spec| spec.signal)
            .ok_or_else(|| SignalError::UnknownSignal(s.to_string()))
    }
}
