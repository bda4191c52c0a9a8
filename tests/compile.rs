use paramcp::{compile, solve, Backend, CompileOptions, McpError, SolveOptions, Sym};

fn projection_options() -> CompileOptions {
    CompileOptions::default()
}

/// Projection of θ onto the nonnegative orthant, written as an MCP:
/// F(z, θ) = [2·z[0..2] − z[2..4] − 2θ; z[0..2]], z[2..4] ≥ 0.
fn projection_residual(z: &[Sym], theta: &[Sym]) -> Vec<Sym> {
    vec![
        2.0 * &z[0] - &z[2] - 2.0 * &theta[0],
        2.0 * &z[1] - &z[3] - 2.0 * &theta[1],
        z[0].clone(),
        z[1].clone(),
    ]
}

fn projection_bounds() -> (Vec<f64>, Vec<f64>) {
    (
        vec![f64::NEG_INFINITY, f64::NEG_INFINITY, 0.0, 0.0],
        vec![f64::INFINITY; 4],
    )
}

#[test]
fn bounds_length_mismatch_is_rejected() {
    let err = compile(
        projection_residual,
        vec![0.0; 4],
        vec![f64::INFINITY; 3],
        2,
        projection_options(),
    )
    .unwrap_err();
    assert!(matches!(err, McpError::DimensionMismatch { what, .. } if what == "upper_bounds"));
}

#[test]
fn residual_length_mismatch_is_rejected() {
    let (lb, ub) = projection_bounds();
    let err = compile(|z, _theta| vec![z[0].clone()], lb, ub, 2, projection_options()).unwrap_err();
    assert!(matches!(
        err,
        McpError::DimensionMismatch {
            what: "residual",
            expected: 4,
            found: 1,
        }
    ));
}

#[test]
fn problem_size_option_is_validated() {
    let (lb, ub) = projection_bounds();
    let err = compile(
        projection_residual,
        lb,
        ub,
        2,
        CompileOptions {
            problem_size: Some(7),
            ..projection_options()
        },
    )
    .unwrap_err();
    assert!(matches!(err, McpError::DimensionMismatch { .. }));
}

#[test]
fn accessors_report_compiled_shape() {
    let (lb, ub) = projection_bounds();
    let problem = compile(projection_residual, lb, ub, 2, projection_options()).unwrap();
    assert_eq!(problem.problem_size(), 4);
    assert_eq!(problem.parameter_dimension(), 2);
    assert!(problem.has_sensitivities());
    // ∂F/∂z: two entries per projection row plus one per feasibility row.
    assert_eq!(problem.jacobian_nnz(), 6);
    assert_eq!(problem.jacobian_z().nrows(), 4);
    assert_eq!(problem.jacobian_z().ncols(), 4);
    let jt = problem.jacobian_theta().unwrap();
    assert_eq!(jt.nnz(), 2);
    assert_eq!((jt.nrows(), jt.ncols()), (4, 2));
}

#[test]
fn affine_problem_has_all_entries_constant() {
    let (lb, ub) = projection_bounds();
    let problem = compile(projection_residual, lb, ub, 2, projection_options()).unwrap();
    // Every ∂F/∂z entry of the affine residual is constant in z…
    assert_eq!(
        problem.jacobian_z().constant_entries,
        (0..6).collect::<Vec<_>>()
    );
    // …and every ∂F/∂θ entry is constant in θ.
    assert_eq!(
        problem.jacobian_theta().unwrap().constant_entries,
        vec![0, 1]
    );
}

#[test]
fn nonlinear_entries_are_not_classified_constant() {
    let problem = compile(
        |z, theta| vec![z[0].powi(2) + &theta[0] * &z[1], 3.0 * &z[0] + &z[1]],
        vec![f64::NEG_INFINITY; 2],
        vec![f64::INFINITY; 2],
        1,
        projection_options(),
    )
    .unwrap();
    // CSC order of ∂F/∂z: (0,0)=2z0, (1,0)=3, (0,1)=θ0, (1,1)=1.
    assert_eq!(problem.jacobian_z().constant_entries, vec![1, 2, 3]);
}

#[test]
fn sparsity_pattern_is_stable_across_evaluations() {
    let (lb, ub) = projection_bounds();
    let mut problem = compile(projection_residual, lb, ub, 2, projection_options()).unwrap();
    let rows = problem.jacobian_z().rows.clone();
    let cols = problem.jacobian_z().cols.clone();

    let first = problem
        .evaluate_jacobian_z(&[0.1, -0.2, 0.3, 0.4], &[1.0, 2.0])
        .clone();
    let second = problem
        .evaluate_jacobian_z(&[-3.0, 7.5, 0.0, 1.0], &[-1.0, 0.5])
        .clone();

    assert_eq!(problem.jacobian_z().rows, rows);
    assert_eq!(problem.jacobian_z().cols, cols);
    assert_eq!(first.colptr, second.colptr);
    assert_eq!(first.rowval, second.rowval);
    // The residual is affine in z, so even the values coincide.
    assert_eq!(first.nzval, second.nzval);
}

#[test]
fn constant_entry_values_do_not_depend_on_z() {
    let mut problem = compile(
        |z, theta| vec![z[0].powi(2) + &theta[0] * &z[1], 3.0 * &z[0] + &z[1]],
        vec![f64::NEG_INFINITY; 2],
        vec![f64::INFINITY; 2],
        1,
        projection_options(),
    )
    .unwrap();
    let constants = problem.jacobian_z().constant_entries.clone();
    let theta = [2.5];
    let a = problem.evaluate_jacobian_z(&[0.0, 0.0], &theta).clone();
    let b = problem.evaluate_jacobian_z(&[11.0, -4.0], &theta).clone();
    for &k in &constants {
        assert_eq!(a.nzval[k], b.nzval[k], "constant entry {} drifted", k);
    }
    // The z0² entry does move.
    assert_ne!(a.nzval[0], b.nzval[0]);
}

#[test]
fn zero_parameter_problem_compiles_and_solves() {
    let mut problem = compile(
        |z, _theta| vec![&z[0] - 1.0],
        vec![f64::NEG_INFINITY],
        vec![f64::INFINITY],
        0,
        projection_options(),
    )
    .unwrap();
    assert_eq!(problem.parameter_dimension(), 0);
    let solution = solve(&mut problem, &[], &SolveOptions::default()).unwrap();
    assert!(solution.status.is_solved());
    assert!((solution.z[0] - 1.0).abs() < 1e-8);
}

#[test]
fn backends_agree_on_residual_and_jacobians() {
    let (lb, ub) = projection_bounds();
    let residual = |z: &[Sym], theta: &[Sym]| {
        vec![
            z[0].powi(2) - &theta[0] * z[1].sin(),
            (&z[1] / 2.0).exp() - &theta[1],
            &z[2] * &z[0] + 1.0,
            z[3].clone() - &theta[0] * &theta[1],
        ]
    };
    let mut tape = compile(
        residual,
        lb.clone(),
        ub.clone(),
        2,
        CompileOptions {
            backend: Backend::Tape,
            ..projection_options()
        },
    )
    .unwrap();
    let mut graph = compile(
        residual,
        lb,
        ub,
        2,
        CompileOptions {
            backend: Backend::Graph,
            ..projection_options()
        },
    )
    .unwrap();

    let z = [0.4, -1.1, 2.2, 0.9];
    let theta = [1.7, 0.3];
    let mut out_t = [0.0; 4];
    let mut out_g = [0.0; 4];
    tape.evaluate_residual(&mut out_t, &z, &theta);
    graph.evaluate_residual(&mut out_g, &z, &theta);
    for k in 0..4 {
        assert!(
            (out_t[k] - out_g[k]).abs() < 1e-14,
            "residual mismatch at {}: tape={}, graph={}",
            k,
            out_t[k],
            out_g[k]
        );
    }

    let jz_t = tape.evaluate_jacobian_z(&z, &theta).clone();
    let jz_g = graph.evaluate_jacobian_z(&z, &theta).clone();
    assert_eq!(jz_t.rowval, jz_g.rowval);
    for k in 0..jz_t.nnz() {
        assert!((jz_t.nzval[k] - jz_g.nzval[k]).abs() < 1e-14);
    }

    let jt_t = tape.evaluate_jacobian_theta(&z, &theta).unwrap().clone();
    let jt_g = graph.evaluate_jacobian_theta(&z, &theta).unwrap().clone();
    for k in 0..jt_t.nnz() {
        assert!((jt_t.nzval[k] - jt_g.nzval[k]).abs() < 1e-14);
    }
}

#[test]
fn sensitivities_can_be_disabled() {
    let (lb, ub) = projection_bounds();
    let problem = compile(
        projection_residual,
        lb,
        ub,
        2,
        CompileOptions {
            compute_sensitivities: false,
            ..projection_options()
        },
    )
    .unwrap();
    assert!(!problem.has_sensitivities());
    assert!(problem.jacobian_theta().is_none());
}

#[test]
#[should_panic(expected = "residual blew up")]
fn user_panic_during_tracing_propagates() {
    let (lb, ub) = projection_bounds();
    let _ = compile(
        |_z: &[Sym], _theta: &[Sym]| -> Vec<Sym> { panic!("residual blew up") },
        lb,
        ub,
        2,
        projection_options(),
    );
}
