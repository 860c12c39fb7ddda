//! Explicit conversion of a right-plus measurement model to the invariant convention.

use nalgebra::{DMatrix, DVector};

use super::{LeftPlus, MeasurementJacobian, MeasurementModel, RightPlus};
use crate::manifold::LieGroup;
use crate::manifold::se3::SE3;

/// Wraps a model linearised in the right-plus convention so a left-plus filter
/// can consume it.
///
/// Since `Exp(ξ) · X = X · Exp(Ad(X⁻¹) ξ)`, the left-plus Jacobian is
/// `H_L = H_R · Ad(X⁻¹)`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantAdapter<M> {
    inner: M,
}

impl<M> InvariantAdapter<M> {
    pub fn new(inner: M) -> Self {
        InvariantAdapter { inner }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: MeasurementModel> MeasurementModel for InvariantAdapter<M> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn value(&self, state: &SE3) -> DVector<f64> {
        self.inner.value(state)
    }

    fn covariance(&self) -> DMatrix<f64> {
        self.inner.covariance()
    }
}

impl<M: MeasurementJacobian<RightPlus>> MeasurementJacobian<LeftPlus> for InvariantAdapter<M> {
    fn jacobian(&self, state: &SE3) -> DMatrix<f64> {
        let adj_inv = state.inverse(None).adjoint();
        let adj_inv = DMatrix::from_column_slice(6, 6, adj_inv.as_slice());
        self.inner.jacobian(state) * adj_inv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GpsMeasurement, LandmarkMeasurement};
    use nalgebra::Vector3;

    #[test]
    fn test_adapter_matches_native_left_jacobians() {
        let x = SE3::from_translation_euler(0.7, -0.4, 1.1, 0.25, -0.35, 0.9);

        let landmark =
            LandmarkMeasurement::from_sigmas(Vector3::new(2.0, 1.0, -1.0), Vector3::repeat(0.01));
        let native = <LandmarkMeasurement as MeasurementJacobian<LeftPlus>>::jacobian(&landmark, &x);
        let adapted = InvariantAdapter::new(landmark.clone());
        assert!((adapted.jacobian(&x) - native).norm() < 1e-12);
        assert_eq!(adapted.value(&x), landmark.value(&x));
        assert_eq!(adapted.dimension(), 3);

        let gps = GpsMeasurement::from_sigmas(Vector3::repeat(0.1));
        let native = <GpsMeasurement as MeasurementJacobian<LeftPlus>>::jacobian(&gps, &x);
        let adapted = InvariantAdapter::new(gps.clone());
        assert!((adapted.jacobian(&x) - native).norm() < 1e-12);
        assert_eq!(adapted.covariance(), gps.covariance());
        assert_eq!(adapted.into_inner(), gps);
    }
}
