//////////////////////////////////////////////////////////////////////////////////////////////////
//                         TESTS
//////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests_refinement {
    use crate::numerical::ImplicitRK::IRK_config::{CapPolicy, TranscriptionConfig};
    use crate::numerical::ImplicitRK::IRK_driver::CollocationDriver;
    use crate::numerical::ImplicitRK::IRK_interfaces::{DynamicsOutput, PointArrays};
    use crate::numerical::ImplicitRK::IRK_refinement::IntervalRefinement;
    use crate::numerical::ImplicitRK::IRK_tests::test_problems::{driver_for, ramp, sample_arrays};
    use crate::numerical::ImplicitRK::butcher_tableau::CollocationMethod;
    use crate::numerical::transcription_errors::TranscriptionError;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    /// x' = x, the control only rides along
    fn growth(_t: f64, x: &DVector<f64>, u: &DVector<f64>) -> Result<DynamicsOutput, TranscriptionError> {
        Ok(DynamicsOutput::value_only(x.clone(), x.len(), u.len()))
    }

    /// x' = 0, so any non-constant state is a large collocation error
    fn stall(_t: f64, x: &DVector<f64>, u: &DVector<f64>) -> Result<DynamicsOutput, TranscriptionError> {
        Ok(DynamicsOutput::value_only(DVector::zeros(x.len()), x.len(), u.len()))
    }

    /// Trapezoid mesh on [0, 1] carrying a state that flips sign at every mesh point.
    fn zigzag_driver(
        policy: CapPolicy,
        num_points: usize,
        cap: usize,
    ) -> (CollocationDriver, PointArrays) {
        let mut config = TranscriptionConfig::new(CollocationMethod::Trapezoid, 1, 0)
            .with_mesh(vec![0.0, 1.0], vec![num_points])
            .with_cap_policy(policy);
        config.refinement.max_total_node_num_per_intv = cap;
        let mut driver = CollocationDriver::new(config);
        driver.initialize_transcription().unwrap();
        driver.set_time_vector(0.0, 1.0).unwrap();
        let steps = (num_points - 1) as f64;
        let arrays = sample_arrays(&driver, |t| vec![(std::f64::consts::PI * steps * t).cos()], |_| vec![]);
        (driver, arrays)
    }

    fn policy_driver(policy: CapPolicy) -> CollocationDriver {
        let config = TranscriptionConfig::new(CollocationMethod::RungeKutta4, 1, 0)
            .with_mesh(vec![0.0, 0.5, 1.0], vec![10, 5])
            .with_cap_policy(policy);
        let mut driver = CollocationDriver::new(config);
        driver.initialize_transcription().unwrap();
        driver
    }

    /// interval 0 owns steps 0..9, interval 1 owns steps 9..13
    fn crafted_step_errors() -> DVector<f64> {
        let mut errors = DVector::zeros(13);
        errors[6] = 1.0;
        errors[10] = 1e-4;
        errors
    }

    #[test]
    fn test_weight_vec() {
        let mut driver = driver_for(CollocationMethod::RungeKutta4, vec![0.0, 1.0], vec![3], 1, 0);
        driver.set_time_vector(0.0, 2.0).unwrap();
        let arrays = sample_arrays(&driver, |t| vec![0.5 * t * t], |_| vec![]);
        let outputs = driver.evaluate_at_points(&arrays, &ramp, 1).unwrap();
        // step 1: x <= 0.5, f <= 1; step 2: x, f <= 2
        assert_relative_eq!(driver.cal_weight_vec(1, &arrays, &outputs).unwrap()[0], 1.0);
        assert_relative_eq!(driver.cal_weight_vec(2, &arrays, &outputs).unwrap()[0], 2.0);
        assert!(driver.cal_weight_vec(3, &arrays, &outputs).is_err());
    }

    #[test]
    fn test_exact_solution_needs_no_refinement() {
        for method in [CollocationMethod::HermiteSimpson, CollocationMethod::RungeKutta6] {
            let mut driver = driver_for(method, vec![0.0, 0.5, 1.0], vec![3, 4], 1, 0);
            driver.set_time_vector(1.0, 3.0).unwrap();
            let arrays = sample_arrays(&driver, |t| vec![0.5 * t * t], |_| vec![]);

            let errors = driver.get_colloc_error_vec(&arrays, &ramp).unwrap();
            assert_eq!(errors.step_errors.len(), 5);
            assert!(errors.step_errors.amax() < 1e-10);

            let result = driver.refine_mesh(&arrays, &ramp).unwrap();
            assert!(!result.is_mesh_refined);
            assert_eq!(result.new_mesh_interval_num_points, vec![3, 4]);
            assert_eq!(result.new_mesh_interval_fractions, driver.mesh_interval_fractions);
            assert_eq!(result.new_discretization_points, driver.mesh().unwrap().discretization_points);
            assert_eq!(result.new_state_guess, arrays.states);
        }
    }

    #[test]
    fn test_error_layout_and_parallel_errors() {
        let mut driver = driver_for(CollocationMethod::Trapezoid, vec![0.0, 0.5, 1.0], vec![3, 4], 1, 1);
        driver.set_time_vector(0.0, 2.0).unwrap();
        let arrays = sample_arrays(&driver, |t| vec![t.exp()], |t| vec![t]);
        let errors = driver.get_colloc_error_vec(&arrays, &growth).unwrap();
        assert_eq!(errors.rel_error_array.shape(), (5, 1));
        assert_eq!(errors.rel_error_array.column(0).into_owned(), errors.step_errors);
        let first = errors.step_errors.rows(0, 2).max();
        let second = errors.step_errors.rows(2, 3).max();
        assert_eq!(errors.max_rel_error_per_interval, DVector::from_vec(vec![first, second]));
        assert!(errors.step_errors.min() > 0.0);

        driver.set_parallel(true);
        let parallel = driver.get_colloc_error_vec(&arrays, &growth).unwrap();
        assert_eq!(parallel, errors);
    }

    #[test]
    fn test_new_mesh_points_within_cap() {
        let driver = policy_driver(CapPolicy::Subdivide);
        let errors = crafted_step_errors();
        // 1e-4 * (5 / (5 + k))^3 <= 1e-5 first holds at k = 6
        assert_eq!(
            driver.get_new_mesh_points(1, &errors).unwrap(),
            IntervalRefinement {
                num_sub_intervals: 1,
                added_points: vec![6],
                cap_limited: false
            }
        );
        let quiet = DVector::from_element(13, 1e-7);
        assert_eq!(driver.get_new_mesh_points(0, &quiet).unwrap().added_points, vec![0]);
        assert!(matches!(
            driver.get_new_mesh_points(2, &errors),
            Err(TranscriptionError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_new_mesh_points_subdivide() {
        let driver = policy_driver(CapPolicy::Subdivide);
        // 10 points + 15 requested > 20: two sub-intervals of 4 and 5 steps,
        // the quiet one still gets a single point
        assert_eq!(
            driver.get_new_mesh_points(0, &crafted_step_errors()).unwrap(),
            IntervalRefinement {
                num_sub_intervals: 2,
                added_points: vec![1, 15],
                cap_limited: false
            }
        );
    }

    #[test]
    fn test_new_mesh_points_clamp() {
        let driver = policy_driver(CapPolicy::Clamp);
        assert_eq!(
            driver.get_new_mesh_points(0, &crafted_step_errors()).unwrap(),
            IntervalRefinement {
                num_sub_intervals: 1,
                added_points: vec![10],
                cap_limited: true
            }
        );
    }

    #[test]
    fn test_new_mesh_points_fail() {
        let driver = policy_driver(CapPolicy::Fail);
        assert_eq!(
            driver.get_new_mesh_points(0, &crafted_step_errors()),
            Err(TranscriptionError::RefinementCapExceeded {
                interval: 0,
                requested: 25,
                cap: 20
            })
        );
        assert!(driver.get_new_mesh_points(1, &crafted_step_errors()).is_ok());
    }

    #[test]
    fn test_refinement_pass_on_coarse_mesh() {
        let mut driver = driver_for(CollocationMethod::Trapezoid, vec![0.0, 1.0], vec![3], 1, 1);
        driver.set_time_vector(0.0, 2.0).unwrap();
        let arrays = sample_arrays(&driver, |t| vec![t.exp()], |t| vec![0.5 * t]);
        let result = driver.refine_mesh(&arrays, &growth).unwrap();

        assert!(result.is_mesh_refined);
        assert_eq!(result.new_mesh_interval_fractions, DVector::from_vec(vec![0.0, 1.0]));
        let n = result.new_mesh_interval_num_points[0];
        assert!(n > 3 && n <= 20);
        assert_eq!(result.new_discretization_points.len(), n);
        assert_eq!(result.new_state_guess.shape(), (n, 1));
        assert_eq!(result.new_control_guess.shape(), (n, 1));

        // end points coincide with old nodes; interior guesses come from the Hermite model
        assert_eq!(result.new_state_guess[(0, 0)], arrays.states[(0, 0)]);
        assert_eq!(result.new_state_guess[(n - 1, 0)], arrays.states[(2, 0)]);
        for (p, tau) in result.new_discretization_points.iter().enumerate() {
            let t = 2.0 * tau;
            assert_relative_eq!(result.new_state_guess[(p, 0)], t.exp(), max_relative = 1e-2);
            assert_relative_eq!(result.new_control_guess[(p, 0)], 0.5 * t, epsilon = 1e-12);
        }

        // the next mesh resolves the same trajectory better
        let config = driver.config.clone().with_mesh(
            result.new_mesh_interval_fractions.iter().cloned().collect(),
            result.new_mesh_interval_num_points.clone(),
        );
        let mut refined = CollocationDriver::new(config);
        refined.initialize_transcription().unwrap();
        refined.set_time_vector(0.0, 2.0).unwrap();
        let guess = PointArrays::new(
            refined.layout().unwrap(),
            result.new_state_guess.clone(),
            result.new_control_guess.clone(),
        )
        .unwrap();
        let exact = sample_arrays(&refined, |t| vec![t.exp()], |t| vec![0.5 * t]);
        assert_eq!(guess.layout, exact.layout);
        let before = result.step_errors.max();
        let after = refined.get_colloc_error_vec(&exact, &growth).unwrap().step_errors.max();
        assert!(after < before);
    }

    #[test]
    fn test_clamp_at_cap_is_not_converged() {
        let (driver, arrays) = zigzag_driver(CapPolicy::Clamp, 20, 20);
        let errors = DVector::from_element(19, 1.0);
        assert_eq!(
            driver.get_new_mesh_points(0, &errors).unwrap(),
            IntervalRefinement {
                num_sub_intervals: 1,
                added_points: vec![0],
                cap_limited: true
            }
        );

        let result = driver.refine_mesh(&arrays, &stall).unwrap();
        assert!(result.step_errors.min() > driver.config.refinement.rel_error_tol);
        assert!(!result.is_mesh_refined);
        assert!(result.cap_limited);
        assert_eq!(result.new_mesh_interval_num_points, vec![20]);
    }

    #[test]
    fn test_single_step_interval_respects_cap() {
        let (driver, arrays) = zigzag_driver(CapPolicy::Subdivide, 2, 5);
        // one step cannot be split, so the interval is filled up to the cap
        assert_eq!(
            driver.get_new_mesh_points(0, &DVector::from_element(1, 1.0)).unwrap(),
            IntervalRefinement {
                num_sub_intervals: 1,
                added_points: vec![3],
                cap_limited: true
            }
        );

        let result = driver.refine_mesh(&arrays, &stall).unwrap();
        assert!(result.is_mesh_refined);
        assert!(result.cap_limited);
        assert_eq!(result.new_mesh_interval_num_points, vec![5]);
        assert_eq!(result.new_discretization_points.len(), 5);
    }

    #[test]
    fn test_refinement_within_cap_is_not_cap_limited() {
        let mut driver = driver_for(CollocationMethod::Trapezoid, vec![0.0, 1.0], vec![3], 1, 1);
        driver.set_time_vector(0.0, 2.0).unwrap();
        let arrays = sample_arrays(&driver, |t| vec![t.exp()], |t| vec![t]);
        let result = driver.refine_mesh(&arrays, &growth).unwrap();
        assert!(result.is_mesh_refined);
        assert!(!result.cap_limited);
    }
}
