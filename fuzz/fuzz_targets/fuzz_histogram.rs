#![no_main]

use libfuzzer_sys::fuzz_target;
use qcal_core::{Histogram, MappingOptions, QuantizationScheme, strategy_for};

fuzz_target!(|data: &[u8]| {
    let values: Vec<f32> = data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let (first, rest) = values.split_at(values.len() / 2);

    let mut hist = Histogram::new(64);
    hist.observe(first);
    hist.observe(rest);
    let finite = values.iter().filter(|v| v.is_finite()).count() as u64;
    assert_eq!(hist.total(), finite);

    let options = MappingOptions {
        precision: 4,
        ..MappingOptions::default()
    };
    for scheme in QuantizationScheme::ALL {
        if let Ok(strategy) = strategy_for(scheme, 0.99) {
            let params = strategy.choose(&hist, &options);
            assert!(params.scale > 0.0 && params.scale.is_finite());
        }
    }
});
