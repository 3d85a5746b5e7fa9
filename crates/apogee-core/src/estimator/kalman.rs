// estimator/kalman.rs
//
// Two-state vertical filter: altitude and vertical velocity, with the
// gravity-compensated accelerometer as the control input and barometric
// altitude as the measurement. Covariance keeps growing while measurements
// are missing, which is exactly the "wider uncertainty, not divergence"
// degradation the estimator needs.

/// Upper clamp on the altitude error covariance so confidence bottoms out
/// instead of overflowing during long outages.
const P_MAX: f32 = 1.0e6;

pub struct VerticalFilter {
    z: f32,    // Estimated altitude (m, relative to pad)
    v: f32,    // Estimated vertical velocity (m/s, up positive)
    p_zz: f32, // Error covariance (alt)
    p_vv: f32, // Error covariance (vel)
    p_zv: f32, // Cross covariance

    r_alt: f32, // Barometric measurement noise
}

impl VerticalFilter {
    pub fn new(r_alt: f32) -> Self {
        Self {
            z: 0.0,
            v: 0.0,
            p_zz: 1.0,
            p_vv: 1.0,
            p_zv: 0.0,
            r_alt,
        }
    }

    /// Propagate the state by `dt` seconds under vertical acceleration
    /// `accel` (net of gravity). `q` is the process noise to apply, inflated
    /// by the caller when no accelerometer backed this step.
    pub fn predict(&mut self, dt: f32, accel: f32, q: f32) {
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        self.z += self.v * dt + 0.5 * accel * dt2;
        self.v += accel * dt;

        self.p_zz += dt * (2.0 * self.p_zv + dt * self.p_vv) + 0.25 * dt4 * q;
        self.p_zv += dt * self.p_vv + 0.5 * dt3 * q;
        self.p_vv += dt2 * q;

        self.clamp();
    }

    /// Fold in a barometric altitude measurement.
    pub fn update(&mut self, measured_z: f32) {
        let innovation = measured_z - self.z;
        let s = self.p_zz + self.r_alt;
        let k_z = self.p_zz / s;
        let k_v = self.p_zv / s;

        self.z += k_z * innovation;
        self.v += k_v * innovation;

        self.p_zz -= k_z * self.p_zz;
        self.p_zv -= k_z * self.p_zv;
        self.p_vv -= k_v * self.p_zv;

        self.clamp();
    }

    fn clamp(&mut self) {
        if self.p_zz > P_MAX {
            self.p_zz = P_MAX;
        }
        if self.p_vv > P_MAX {
            self.p_vv = P_MAX;
        }
    }

    pub fn reset(&mut self, altitude: f32) {
        self.z = altitude;
        self.v = 0.0;
        self.p_zz = 1.0;
        self.p_vv = 1.0;
        self.p_zv = 0.0;
    }

    pub fn altitude(&self) -> f32 {
        self.z
    }

    pub fn velocity(&self) -> f32 {
        self.v
    }

    pub fn altitude_variance(&self) -> f32 {
        self.p_zz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converges_on_static_altitude() {
        let mut kf = VerticalFilter::new(4.0);
        for _ in 0..200 {
            kf.predict(0.005, 0.0, 0.25);
            kf.update(100.0);
        }
        assert!((kf.altitude() - 100.0).abs() < 0.5);
        assert!(kf.velocity().abs() < 0.5);
    }

    #[test]
    fn test_acceleration_integrates_into_velocity() {
        let mut kf = VerticalFilter::new(4.0);
        // 2 seconds at 20 m/s² with no measurements
        for _ in 0..400 {
            kf.predict(0.005, 20.0, 0.25);
        }
        assert!((kf.velocity() - 40.0).abs() < 1.0);
        assert!((kf.altitude() - 40.0).abs() < 2.0);
    }

    #[test]
    fn test_covariance_grows_without_measurement_and_stays_bounded() {
        let mut kf = VerticalFilter::new(4.0);
        kf.predict(0.005, 0.0, 100.0);
        let early = kf.altitude_variance();
        for _ in 0..100_000 {
            kf.predict(0.005, 0.0, 100.0);
        }
        let late = kf.altitude_variance();
        assert!(late > early);
        assert!(late <= P_MAX);
    }

    #[test]
    fn test_measurement_shrinks_covariance() {
        let mut kf = VerticalFilter::new(4.0);
        for _ in 0..100 {
            kf.predict(0.005, 0.0, 100.0);
        }
        let before = kf.altitude_variance();
        kf.update(0.0);
        assert!(kf.altitude_variance() < before);
    }
}
