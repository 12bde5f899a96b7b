//! Physical Values and Decoding Formulas
//!
//! Every formula reads fixed byte ranges of a response whose shape the
//! driver has already validated. Out-of-range reads yield empty slices, so
//! decoding never fails.

use obd_protocol::RawFrame;
use serde::{Deserialize, Serialize};

/// Position reported by the accessory interface module
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
    /// Degrees from north
    pub heading: f64,
}

/// Decoded value of a signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    /// Single engineering value
    Scalar(f64),
    /// GPS position and heading
    Gps(GpsFix),
}

impl SignalValue {
    /// The scalar value, if this is one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SignalValue::Scalar(v) => Some(*v),
            SignalValue::Gps(_) => None,
        }
    }

    /// The GPS fix, if this is one
    pub fn as_gps(&self) -> Option<&GpsFix> {
        match self {
            SignalValue::Gps(fix) => Some(fix),
            SignalValue::Scalar(_) => None,
        }
    }
}

/// Big-endian unsigned integer
fn be_unsigned(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Big-endian two's complement integer
fn be_signed(bytes: &[u8]) -> i64 {
    let raw = be_unsigned(bytes);
    let bits = bytes.len() * 8;
    if bits == 0 || bits >= 64 {
        return raw as i64;
    }
    if raw & (1 << (bits - 1)) != 0 {
        raw as i64 - (1i64 << bits)
    } else {
        raw as i64
    }
}

/// Data bytes of a single-frame reply: everything after the
/// response code and echoed command
fn data(frame: &RawFrame) -> f64 {
    be_unsigned(frame.bytes(0, 3..)) as f64
}

pub(crate) fn raw(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar(data(frame))
}

pub(crate) fn acceleration(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar(data(frame) / 256.0)
}

pub(crate) fn abs_steering_angle(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar((data(frame) - 7800.0) / 10.0)
}

pub(crate) fn rpm(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar(data(frame) / 4.0)
}

pub(crate) fn obdii_speed(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar(data(frame) / 128.0)
}

pub(crate) fn fraction(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar(data(frame) / 255.0)
}

pub(crate) fn ambient_temperature(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar(data(frame) / 2.0 - 40.0)
}

pub(crate) fn intake_temperature(frame: &RawFrame) -> SignalValue {
    SignalValue::Scalar(data(frame) - 40.0)
}

/// Latitude and longitude are signed minutes in the second frame,
/// heading sits in the third
pub(crate) fn gps(frame: &RawFrame) -> SignalValue {
    SignalValue::Gps(GpsFix {
        latitude: be_signed(frame.bytes(1, 1..3)) as f64 / 60.0,
        longitude: be_signed(frame.bytes(1, 5..7)) as f64 / 60.0,
        heading: be_unsigned(frame.bytes(2, 3..5)) as f64,
    })
}

/// Magnitude in 90/2048 degree steps; a direction flag in the second
/// frame selects the sign (right is negative)
pub(crate) fn sas_steering_angle(frame: &RawFrame) -> SignalValue {
    let direction = frame.bytes(1, 4..5).first().copied().unwrap_or(0);
    let sign = direction as f64 * 2.0 - 1.0;
    let magnitude = be_unsigned(frame.bytes(0, 3..5)) as f64 * (90.0 / 2048.0);
    SignalValue::Scalar(sign * magnitude)
}
