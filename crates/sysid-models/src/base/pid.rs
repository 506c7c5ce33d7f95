//! PID controller parameters for closed-loop simulation.
//!
//! Only simulation needs these; identifying controller parameters from
//! data is out of scope.

use serde::{Deserialize, Serialize};

/// Parameters of a discrete PI(D) controller in velocity form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidParameters {
    /// Proportional gain
    pub kp: f64,
    /// Integral time in seconds; zero disables the integral term
    pub ti_s: f64,
    /// Derivative time in seconds; zero disables the derivative term
    pub td_s: f64,
    /// Output clamp, when set
    pub u_min: Option<f64>,
    pub u_max: Option<f64>,
}

impl Default for PidParameters {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ti_s: 0.0,
            td_s: 0.0,
            u_min: None,
            u_max: None,
        }
    }
}
