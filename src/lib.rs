// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! PWM fan control with a hysteresis band.
//!
//! [`curve`] holds the pure speed decision, [`control`] threads the fan
//! state through it one tick at a time, and [`sysfs`] provides the Linux
//! temperature source and PWM outputs the daemon drives.

pub mod config;
pub mod control;
pub mod curve;
pub mod protocol;
pub mod sysfs;
