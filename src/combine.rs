use crate::enums::CombinePolicy;
use crate::services::{LabelCombineService, ServiceError};
use crate::volume::LabelVolume;

use ndarray::Zip;

/// Voxel-wise union of two label volumes.
///
/// With the default [`CombinePolicy::FirstOverwrites`], `combine(a, b)`
/// takes `a` wherever `a` is foreground and `b` everywhere else. A zero in
/// either operand never clears a label held by the other.
#[derive(Clone, Copy, Debug, Default)]
pub struct LabelUnion {
    pub policy: CombinePolicy,
}

impl LabelUnion {
    pub fn new(policy: CombinePolicy) -> Self {
        Self { policy }
    }
}

impl LabelCombineService for LabelUnion {
    fn combine(&self, a: &LabelVolume, b: &LabelVolume) -> Result<LabelVolume, ServiceError> {
        if !a.same_geometry(b) {
            return Err(ServiceError::GeometryMismatch {
                a: a.dim(),
                b: b.dim(),
            });
        }

        let (winner, other) = match self.policy {
            CombinePolicy::FirstOverwrites => (a, b),
            CombinePolicy::SecondOverwrites => (b, a),
        };

        let mut result = a.zeros_like();
        Zip::from(result.data_mut())
            .and(winner.data())
            .and(other.data())
            .par_for_each(|out, &w, &o| *out = if w != 0 { w } else { o });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, array};

    fn pair() -> (LabelVolume, LabelVolume) {
        let a = LabelVolume::new(array![[[2, 2, 0, 0]]], (1.0, 1.0, 1.0));
        let b = LabelVolume::new(array![[[1, 0, 1, 0]]], (1.0, 1.0, 1.0));
        (a, b)
    }

    #[test]
    fn first_operand_wins_by_default() {
        let (a, b) = pair();
        let result = LabelUnion::default().combine(&a, &b).expect("same geometry");
        assert_eq!(result.data(), &array![[[2u16, 2, 1, 0]]]);
    }

    #[test]
    fn second_operand_wins_when_configured() {
        let (a, b) = pair();
        let result = LabelUnion::new(CombinePolicy::SecondOverwrites)
            .combine(&a, &b)
            .expect("same geometry");
        assert_eq!(result.data(), &array![[[1u16, 2, 1, 0]]]);
    }

    #[test]
    fn self_union_is_identity() {
        let (a, _) = pair();
        let result = LabelUnion::default().combine(&a, &a).expect("same geometry");
        assert_eq!(result, a);
    }

    #[test]
    fn empty_operand_is_a_no_op() {
        let (a, _) = pair();
        let empty = a.zeros_like();
        let union = LabelUnion::default();
        assert_eq!(union.combine(&empty, &a).expect("same geometry"), a);
        assert_eq!(union.combine(&a, &empty).expect("same geometry"), a);
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let (a, _) = pair();
        let b = LabelVolume::new(Array3::zeros((1, 1, 3)), (1.0, 1.0, 1.0));
        let result = LabelUnion::default().combine(&a, &b);
        assert!(matches!(result, Err(ServiceError::GeometryMismatch { .. })));

        let shifted = a.clone().with_origin((0.0, 0.0, 1.0));
        assert!(LabelUnion::default().combine(&a, &shifted).is_err());
    }
}
