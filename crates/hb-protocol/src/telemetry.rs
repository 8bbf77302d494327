//! Derived values over the latest hall and electrical samples.
//!
//! No filtering and no history: every call recomputes from the samples passed in.
//! Before the first sample arrives the cache is all zeros, which reads the same as
//! a stopped board.

use crate::decode::{ElectricalMeasurements, HallSample};

pub fn mms_to_kmh(mm_per_s: f64) -> f64 {
    mm_per_s * 3600.0 / 1_000_000.0
}

pub fn wheel_mms(hall: &[HallSample; 2], wheel: usize) -> Option<f64> {
    hall.get(wheel).map(|s| f64::from(s.speed_mm_per_s))
}

pub fn wheel_kmh(hall: &[HallSample; 2], wheel: usize) -> Option<f64> {
    wheel_mms(hall, wheel).map(mms_to_kmh)
}

/// Mean of both wheels.
pub fn speed_mms(hall: &[HallSample; 2]) -> f64 {
    (f64::from(hall[0].speed_mm_per_s) + f64::from(hall[1].speed_mm_per_s)) / 2.0
}

/// Wheel 0 minus the mean.
pub fn steer_mms(hall: &[HallSample; 2]) -> f64 {
    f64::from(hall[0].speed_mm_per_s) - speed_mms(hall)
}

pub fn speed_kmh(hall: &[HallSample; 2]) -> f64 {
    mms_to_kmh(speed_mms(hall))
}

pub fn steer_kmh(hall: &[HallSample; 2]) -> f64 {
    mms_to_kmh(f64::from(hall[0].speed_mm_per_s)) - speed_kmh(hall)
}

pub fn battery_voltage(e: &ElectricalMeasurements) -> f32 {
    e.battery_voltage
}

/// Average DC current of `motor`; `None` past the last motor.
pub fn motor_amps_avg(e: &ElectricalMeasurements, motor: usize) -> Option<f32> {
    e.motors.get(motor).map(|m| m.dc_amps_avg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hall(s0: i32, s1: i32) -> [HallSample; 2] {
        [
            HallSample {
                speed_mm_per_s: s0,
                ..Default::default()
            },
            HallSample {
                speed_mm_per_s: s1,
                ..Default::default()
            },
        ]
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_straight_line() {
        let h = hall(1000, 1000);
        assert!(close(speed_kmh(&h), 3.6));
        assert!(close(steer_kmh(&h), 0.0));
        assert!(close(speed_mms(&h), 1000.0));
    }

    #[test]
    fn test_one_wheel_stopped() {
        let h = hall(1000, 0);
        assert!(close(speed_kmh(&h), 1.8));
        assert!(close(steer_kmh(&h), 1.8));
        assert!(close(steer_mms(&h), 500.0));
    }

    #[test]
    fn test_per_wheel() {
        let h = hall(250, -750);
        assert_eq!(wheel_mms(&h, 0), Some(250.0));
        assert_eq!(wheel_mms(&h, 1), Some(-750.0));
        assert!(close(wheel_kmh(&h, 1).unwrap(), -2.7));
        assert_eq!(wheel_mms(&h, 2), None);
    }

    #[test]
    fn test_zero_before_first_sample() {
        let h = [HallSample::default(); 2];
        assert_eq!(speed_kmh(&h), 0.0);
        assert_eq!(steer_kmh(&h), 0.0);
    }

    #[test]
    fn test_motor_index_bounds() {
        let mut e = ElectricalMeasurements::default();
        e.motors[1].dc_amps_avg = 2.5;
        assert_eq!(motor_amps_avg(&e, 1), Some(2.5));
        assert_eq!(motor_amps_avg(&e, 2), None);
    }
}
