#![no_main]

use libfuzzer_sys::fuzz_target;
use qcal_core::{CalibrationError, QuantizationScheme, StaticOptions};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Parsing arbitrary text must never panic, and every record it
        // accepts either describes a valid histogram or reports overflow.
        if let Ok(records) = qcal_observe::parse_dump(text) {
            for record in &records {
                let Some(bins) = &record.bins else {
                    continue;
                };
                let options = StaticOptions {
                    scheme: QuantizationScheme::Percentile,
                    ..StaticOptions::default()
                };
                match qcal_core::choose_static_quantization_params(
                    record.min, record.max, bins, &options,
                ) {
                    Ok(params) => assert!(params.scale > 0.0),
                    Err(err) => assert_eq!(err, CalibrationError::CountOverflow),
                }
            }
        }
    }
});
