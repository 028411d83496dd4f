//! Simple QP example demonstrating the asqp solver.
//!
//! Solves:
//!   minimize    x1^2 + x2^2 - 4 x1 - 6 x2
//!   subject to  0 <= x1, x2 <= 1
//!               x1 + x2 <= 1.5
//!
//! Optimal solution: x1 = 0.5, x2 = 1.0 (the linear constraint and the
//! upper bound on x2 bind).

use asqp_core::linalg::sparse;
use asqp_core::{solve, QpProblem, SolverSettings};

fn main() {
    let problem = QpProblem {
        h: sparse::from_triplets(2, 2, vec![(0, 0, 2.0), (1, 1, 2.0)]),
        g: vec![-4.0, -6.0],
        a: sparse::from_triplets(1, 2, vec![(0, 0, 1.0), (0, 1, 1.0)]),
        lbx: vec![0.0, 0.0],
        ubx: vec![1.0, 1.0],
        lba: vec![f64::NEG_INFINITY],
        uba: vec![1.5],
    };

    let settings = SolverSettings {
        verbose: true,
        ..Default::default()
    };

    match solve(&problem, &settings) {
        Ok(result) => {
            println!();
            println!("status:    {}", result.status);
            println!("x          = [{:.6}, {:.6}]", result.x[0], result.x[1]);
            println!("lam_x      = {:?}", result.lam_x);
            println!("lam_a      = {:?}", result.lam_a);
            println!("objective  = {:.6}", result.obj_val);
            println!("iterations = {}", result.info.iters);

            let sum = result.x[0] + result.x[1];
            println!("constraint: x1 + x2 = {:.6} (<= 1.5)", sum);
        }
        Err(e) => {
            eprintln!("Solver failed: {}", e);
            std::process::exit(1);
        }
    }
}
