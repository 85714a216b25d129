use _core::convergence::{study, StudyTarget};
use _core::flow::simulate;
use _core::settings::{CalibrationSettings, ConvergenceSettings, SolverSettings};
use _core::{
    ConstantGas, FitMode, GasState, IdealGas, MeasuredSeries, ParameterVector, SampleGeometry,
};
use ndarray::{Array, Array1};

fn geometry() -> SampleGeometry {
    SampleGeometry::cylinder(0.05, 0.05, "N2", 10e-6, 10e-6).unwrap()
}

fn linear_gas() -> ConstantGas {
    ConstantGas(GasState {
        compressibility: 1e-6,
        viscosity: 1e-5,
        density: 1.0,
    })
}

fn source(t_max: f64) -> MeasuredSeries {
    MeasuredSeries::new(
        Array::geomspace(1.0, t_max, 10).unwrap(),
        Array1::from_elem(10, 5e6),
        Array1::from_elem(10, 1e5),
        Array1::from_elem(10, 298.0),
    )
    .unwrap()
}

#[test]
fn time_refinement_shows_first_order_backward_euler() {
    let settings = ConvergenceSettings {
        levels: [(30, 400), (30, 200), (30, 100)],
        ..Default::default()
    };
    let report = study(
        &source(300.0),
        &geometry(),
        &StudyTarget::Fixed(ParameterVector::new(1e-17, 0.1)),
        &linear_gas(),
        &settings,
    )
    .unwrap();
    assert_eq!(report.refinement_ratio, 2.0);
    assert_eq!(report.records.len(), 3);
    let order = report.inlet.order;
    assert!(order > 0.6 && order < 1.4, "observed order {}", order);
    assert!(report.inlet.gci_fine < report.inlet.gci_coarse);
    assert!(report.inlet.extrapolated.is_finite());
}

// With the chamber cells at both ends the pore length is (N - 2) dx and the
// chamber faces use harmonic(1, k), so space refinement converges at first
// order.
#[test]
fn space_refinement_converges_at_first_order() {
    let settings = ConvergenceSettings {
        levels: [(80, 100), (40, 100), (20, 100)],
        ..Default::default()
    };
    let report = study(
        &source(300.0),
        &geometry(),
        &StudyTarget::Fixed(ParameterVector::new(1e-17, 0.1)),
        &linear_gas(),
        &settings,
    )
    .unwrap();
    assert_eq!(report.refinement_ratio, 2.0);
    for boundary in [&report.inlet, &report.outlet] {
        assert!(
            boundary.order > 0.6 && boundary.order < 1.5,
            "observed order {}",
            boundary.order
        );
        assert!(boundary.gci_fine < boundary.gci_coarse);
    }
}

#[test]
fn parallel_and_sequential_levels_agree() {
    let target = StudyTarget::Fixed(ParameterVector::new(1e-18, 0.1));
    let parallel = ConvergenceSettings {
        levels: [(20, 40), (10, 20), (5, 10)],
        parallel: true,
        ..Default::default()
    };
    let sequential = ConvergenceSettings {
        parallel: false,
        ..parallel.clone()
    };
    let a = study(&source(1000.0), &geometry(), &target, &IdealGas, &parallel).unwrap();
    let b = study(&source(1000.0), &geometry(), &target, &IdealGas, &sequential).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.records[0].number_of_cells, 20);
    assert_eq!(a.records[2].time_samples, 10);
    assert!(a.to_string().contains("Grid Convergence Study"));
}

#[test]
fn each_level_can_recalibrate() {
    let geometry = geometry();
    let truth = ParameterVector::new(1e-18, 0.1);
    let measured = {
        let template = source(1000.0);
        let output = simulate(
            &template,
            &geometry,
            &truth,
            &IdealGas,
            &SolverSettings::with_cells(20),
        )
        .unwrap();
        template
            .with_pressures(output.computed.inlet, output.computed.outlet)
            .unwrap()
    };
    let target = StudyTarget::Calibrated {
        initial_guess: ParameterVector::new(5e-19, 0.1),
        mode: FitMode::Permeability,
        settings: CalibrationSettings::default(),
    };
    let settings = ConvergenceSettings {
        levels: [(20, 40), (10, 20), (5, 10)],
        ..Default::default()
    };
    let report = study(&measured, &geometry, &target, &IdealGas, &settings).unwrap();
    for record in &report.records {
        assert!(record.parameters.permeability > 0.0);
        assert_eq!(record.parameters.porosity, 0.1);
        assert!(record.inlet >= record.outlet);
    }
}
