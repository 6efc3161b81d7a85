mod common;

use qcal_core::{
    CalibrationConfig, CalibrationError, QuantizationFactory, QuantizationScheme,
};
use qcal_observe::{
    DumpInterval, MemoryWorkspace, ObserveError, ObserverRegistry, QParamsTable, parse_dump,
    read_dump,
};

#[test]
fn attaching_to_unknown_graph_fails() {
    let ws = MemoryWorkspace::new();
    let mut registry = ObserverRegistry::new();
    let err = registry
        .attach_histogram_observer(&ws, "ghost", "out.txt", DumpInterval::from_frequency(-1), false)
        .unwrap_err();
    assert_eq!(err.to_string(), "graph 'ghost' not found in workspace");
    assert!(registry.is_empty());
}

#[test]
fn malformed_dump_reports_line() {
    let err = parse_dump("a 0 1\nb 0 1 4 1 2 3\n").unwrap_err();
    assert!(matches!(err, ObserveError::Parse { line: 2, .. }), "{err}");
}

#[test]
fn missing_dump_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_dump(&dir.path().join("absent.txt")).unwrap_err();
    assert!(err.to_string().contains("absent.txt"), "{err}");
}

#[test]
fn invalid_precision_surfaces_from_table() {
    let records = parse_dump("t -1 1 4 1 2 3 4\n").unwrap();
    let factory = QuantizationFactory::default();
    let config = CalibrationConfig {
        precision: 17,
        ..CalibrationConfig::default()
    };
    let err = QParamsTable::from_records(&records, &factory, QuantizationScheme::L2Approx, &config)
        .unwrap_err();
    assert!(matches!(
        err,
        ObserveError::Calibration(CalibrationError::InvalidPrecision(17))
    ));
}

#[test]
fn out_of_range_thresholds_are_rejected() {
    let mut factory = QuantizationFactory::default();
    assert_eq!(
        factory.set_activation_percentile_threshold(0.5),
        Err(CalibrationError::InvalidThreshold(0.5))
    );
    assert_eq!(factory.config().activation_percentile_threshold, 0.99);

    let hist = common::histogram(&common::uniform(0.0, 1.0, 100), 64);
    let config = CalibrationConfig {
        percentile_threshold: Some(1.01),
        ..CalibrationConfig::default()
    };
    let err = factory
        .choose_params(
            qcal_core::Statistics::Histogram(&hist),
            QuantizationScheme::Percentile,
            &config,
        )
        .unwrap_err();
    assert_eq!(err, CalibrationError::InvalidThreshold(1.01));
}

#[test]
fn strict_scheme_parsing() {
    let err = "bogus".parse::<QuantizationScheme>().unwrap_err();
    assert_eq!(err.to_string(), "unknown quantization scheme 'bogus'");
    assert_eq!(
        QuantizationScheme::from_name_or_default("bogus"),
        QuantizationScheme::MinMax
    );
}
